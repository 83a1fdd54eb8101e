pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};

pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::options::Options;
