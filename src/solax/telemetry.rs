use crate::prelude::*;
use crate::error::{Error, Result};

use serde::Serialize;

/// Token the device answers with when it cannot serve a query. Seen for
/// unit indexes past the end of the bank.
const NAK: &[u8] = b"NAK";

/// Trailing CRC bytes attached to every response payload.
const CRC_LEN: usize = 2;

// UnitTelemetry {{{
/// State of one inverter unit, decoded from one QPGSn response line.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTelemetry {
    pub parallel_num: i32,
    pub serial_number: String,
    pub work_mode: char,
    pub fault_code: i32,
    #[serde(rename = "gridVoltage_V")]
    pub grid_voltage: f64,
    #[serde(rename = "gridFrequency_Hz")]
    pub grid_frequency: f64,
    #[serde(rename = "acOutputVoltage_V")]
    pub ac_output_voltage: f64,
    #[serde(rename = "acOutputFrequency_Hz")]
    pub ac_output_frequency: f64,
    #[serde(rename = "acOutputApparentPower_VA")]
    pub ac_output_apparent_power: i32,
    #[serde(rename = "acOutputActivePower_W")]
    pub ac_output_active_power: i32,
    pub load_percent: i32,
    #[serde(rename = "batteryVoltage_V")]
    pub battery_voltage: f64,
    #[serde(rename = "batteryChargingCurrent_A")]
    pub battery_charging_current: i32,
    #[serde(rename = "batteryCapacity_pct")]
    pub battery_capacity: i32,
    #[serde(rename = "pv1InputVoltage_V")]
    pub pv1_input_voltage: f64,
    #[serde(rename = "totalChargingCurrent_A")]
    pub total_charging_current: i32,
    #[serde(rename = "totalAcOutputApparentPower_VA")]
    pub total_ac_output_apparent_power: i32,
    #[serde(rename = "totalOutputActivePower_W")]
    pub total_output_active_power: i32,
    pub total_ac_output_percent: i32,
    pub inverter_status: String,
    pub output_mode: i32,
    pub charger_source_priority: i32,
    #[serde(rename = "maxChargerCurrent_A")]
    pub max_charger_current: i32,
    #[serde(rename = "maxChargerRange_A")]
    pub max_charger_range: i32,
    #[serde(rename = "maxAcChargerCurrent_A")]
    pub max_ac_charger_current: i32,
    #[serde(rename = "pv1InputCurrent_A")]
    pub pv1_input_current: i32,
    #[serde(rename = "batteryDischargeCurrent_A")]
    pub battery_discharge_current: i32,
    #[serde(rename = "pv2InputVoltage_V")]
    pub pv2_input_voltage: f64,
    #[serde(rename = "pv2InputCurrent_A")]
    pub pv2_input_current: i32,
}

impl UnitTelemetry {
    /// A unit at position 0 does not exist; it marks the end of the bank.
    pub fn is_bank_terminator(&self) -> bool {
        self.parallel_num == 0
    }

    pub fn solar_power(&self) -> f64 {
        self.pv1_input_voltage * f64::from(self.pv1_input_current)
            + self.pv2_input_voltage * f64::from(self.pv2_input_current)
    }

    /// Positive while the battery is charging, negative while discharging.
    pub fn battery_power(&self) -> f64 {
        self.battery_voltage
            * (f64::from(self.battery_charging_current) - f64::from(self.battery_discharge_current))
    }
} // }}}

// AggregatedTelemetry {{{
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AggregatedTelemetry {
    #[serde(rename = "solarPower_W")]
    pub solar_power: f64,
    #[serde(rename = "acPower_W")]
    pub ac_power: f64,
    #[serde(rename = "batteryPower_W")]
    pub battery_power: f64,
}

pub fn aggregate(units: &[UnitTelemetry]) -> AggregatedTelemetry {
    units
        .iter()
        .filter(|unit| !unit.is_bank_terminator())
        .fold(AggregatedTelemetry::default(), |mut agg, unit| {
            agg.solar_power += unit.solar_power();
            agg.ac_power += f64::from(unit.ac_output_active_power);
            agg.battery_power += unit.battery_power();
            agg
        })
} // }}}

// Field table {{{
struct Field {
    name: &'static str,
    decode: fn(&mut UnitTelemetry, &str) -> Result<()>,
}

fn malformed(field: &'static str, token: &str) -> Error {
    Error::MalformedTelemetry {
        field,
        token: token.to_string(),
    }
}

fn int(field: &'static str, token: &str) -> Result<i32> {
    token.parse().map_err(|_| malformed(field, token))
}

// f64::from_str also takes "nan" and "inf", which are not readings
fn float(field: &'static str, token: &str) -> Result<f64> {
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(malformed(field, token)),
    }
}

fn text(_field: &'static str, token: &str) -> Result<String> {
    Ok(token.to_string())
}

fn single_char(field: &'static str, token: &str) -> Result<char> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(malformed(field, token)),
    }
}

macro_rules! field {
    ($name:ident, $decoder:ident) => {
        Field {
            name: stringify!($name),
            decode: |unit, token| {
                unit.$name = $decoder(stringify!($name), token)?;
                Ok(())
            },
        }
    };
}

// wire order of the QPGSn response, position is the only key
const FIELDS: &[Field] = &[
    field!(parallel_num, int),
    field!(serial_number, text),
    field!(work_mode, single_char),
    field!(fault_code, int),
    field!(grid_voltage, float),
    field!(grid_frequency, float),
    field!(ac_output_voltage, float),
    field!(ac_output_frequency, float),
    field!(ac_output_apparent_power, int),
    field!(ac_output_active_power, int),
    field!(load_percent, int),
    field!(battery_voltage, float),
    field!(battery_charging_current, int),
    field!(battery_capacity, int),
    field!(pv1_input_voltage, float),
    field!(total_charging_current, int),
    field!(total_ac_output_apparent_power, int),
    field!(total_output_active_power, int),
    field!(total_ac_output_percent, int),
    field!(inverter_status, text),
    field!(output_mode, int),
    field!(charger_source_priority, int),
    field!(max_charger_current, int),
    field!(max_charger_range, int),
    field!(max_ac_charger_current, int),
    field!(pv1_input_current, int),
    field!(battery_discharge_current, int),
    field!(pv2_input_voltage, float),
    field!(pv2_input_current, int),
];

/// Number of whitespace separated fields in a complete QPGSn response.
pub const FIELD_COUNT: usize = FIELDS.len();
// }}}

/// Decodes the payload of one response frame (the bytes between `(` and
/// `\r`, CRC still attached) into a [`UnitTelemetry`].
///
/// Missing trailing tokens leave their fields at the default value, so an
/// empty payload decodes to a bank terminator. A token that does
/// not convert to its field's type rejects the whole record.
pub fn parse(payload: &[u8]) -> Result<UnitTelemetry> {
    let data = payload
        .len()
        .checked_sub(CRC_LEN)
        .map_or(payload, |len| &payload[..len]);

    let mut unit = UnitTelemetry::default();

    if data.starts_with(NAK) {
        debug!("NAK response, treating as end of bank");
        return Ok(unit);
    }

    let tokens = data
        .split(|b| b.is_ascii_whitespace())
        .filter(|token| !token.is_empty());

    for (field, token) in FIELDS.iter().zip(tokens) {
        let token = std::str::from_utf8(token)
            .map_err(|_| malformed(field.name, &String::from_utf8_lossy(token)))?;
        (field.decode)(&mut unit, token)?;
    }

    Ok(unit)
}
