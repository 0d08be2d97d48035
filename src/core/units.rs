use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

pub const MINUTES_PER_HOUR: u32 = 60;
pub const HOURS_PER_DAY: u32 = 24;
pub const MINUTES_PER_DAY: u32 = MINUTES_PER_HOUR * HOURS_PER_DAY;
pub const DAYS_PER_YEAR: u32 = 365;
pub const MAX_DAYS_PER_YEAR: u32 = 366;
pub const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Number of day-type slots in a week definition (Sun..Sat, Holiday, design
/// days, two custom day types).
pub const DAY_TYPE_COUNT: usize = 12;

/// Physical units attached to report variables and meters.
///
/// Unknown unit strings resolve to `None` from [`Unit::from_user_string`]
/// rather than an error, since callers treat a missing unit as non-fatal.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Unit {
    #[default]
    #[serde(rename = "")]
    Dimensionless,
    J,
    W,
    C,
    K,
    DeltaC,
    #[serde(rename = "kg")]
    Kilograms,
    #[serde(rename = "kg/s")]
    KilogramsPerSecond,
    #[serde(rename = "kg/m3")]
    KilogramsPerCubicMetre,
    #[serde(rename = "kgWater/kgDryAir")]
    KilogramsWaterPerKilogramDryAir,
    #[serde(rename = "m")]
    Metres,
    #[serde(rename = "m2")]
    SquareMetres,
    #[serde(rename = "m3")]
    CubicMetres,
    #[serde(rename = "m3/s")]
    CubicMetresPerSecond,
    #[serde(rename = "m/s")]
    MetresPerSecond,
    L,
    #[serde(rename = "W/m2")]
    WattsPerSquareMetre,
    #[serde(rename = "W/m2-K")]
    WattsPerSquareMetreKelvin,
    #[serde(rename = "W/K")]
    WattsPerKelvin,
    Pa,
    #[serde(rename = "ppm")]
    PartsPerMillion,
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "hr")]
    Hours,
    #[serde(rename = "min")]
    Minutes,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "lux")]
    Lux,
    #[serde(rename = "lum/W")]
    LumensPerWatt,
    #[serde(rename = "cd/m2")]
    CandelasPerSquareMetre,
    #[serde(rename = "deg")]
    Degrees,
    A,
    V,
    Ah,
    #[serde(rename = "kWh")]
    KilowattHours,
    #[serde(rename = "ach")]
    AirChangesPerHour,
    #[serde(rename = "clo")]
    Clo,
    #[serde(rename = "J/kg")]
    JoulesPerKilogram,
    #[serde(rename = "J/kg-K")]
    JoulesPerKilogramKelvin,
    #[serde(rename = "W/m-K")]
    WattsPerMetreKelvin,
    #[serde(rename = "rad")]
    Radians,
    #[serde(rename = "kmol/s")]
    KilomolesPerSecond,
}

impl Unit {
    /// Canonical string used in dictionary headers and bracketed `[unit]`
    /// suffixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Dimensionless => "",
            Unit::J => "J",
            Unit::W => "W",
            Unit::C => "C",
            Unit::K => "K",
            Unit::DeltaC => "deltaC",
            Unit::Kilograms => "kg",
            Unit::KilogramsPerSecond => "kg/s",
            Unit::KilogramsPerCubicMetre => "kg/m3",
            Unit::KilogramsWaterPerKilogramDryAir => "kgWater/kgDryAir",
            Unit::Metres => "m",
            Unit::SquareMetres => "m2",
            Unit::CubicMetres => "m3",
            Unit::CubicMetresPerSecond => "m3/s",
            Unit::MetresPerSecond => "m/s",
            Unit::L => "L",
            Unit::WattsPerSquareMetre => "W/m2",
            Unit::WattsPerSquareMetreKelvin => "W/m2-K",
            Unit::WattsPerKelvin => "W/K",
            Unit::Pa => "Pa",
            Unit::PartsPerMillion => "ppm",
            Unit::Percent => "%",
            Unit::Hours => "hr",
            Unit::Minutes => "min",
            Unit::Seconds => "s",
            Unit::Lux => "lux",
            Unit::LumensPerWatt => "lum/W",
            Unit::CandelasPerSquareMetre => "cd/m2",
            Unit::Degrees => "deg",
            Unit::A => "A",
            Unit::V => "V",
            Unit::Ah => "Ah",
            Unit::KilowattHours => "kWh",
            Unit::AirChangesPerHour => "ach",
            Unit::Clo => "clo",
            Unit::JoulesPerKilogram => "J/kg",
            Unit::JoulesPerKilogramKelvin => "J/kg-K",
            Unit::WattsPerMetreKelvin => "W/m-K",
            Unit::Radians => "rad",
            Unit::KilomolesPerSecond => "kmol/s",
        }
    }

    /// Case-insensitive lookup of a user-provided unit string. Unrecognised
    /// strings give `None` so absence of a unit stays non-fatal.
    pub fn from_user_string(s: &str) -> Option<Self> {
        let wanted = s.trim();
        ALL_UNITS
            .iter()
            .find(|unit| unit.as_str().eq_ignore_ascii_case(wanted))
            .copied()
    }
}

const ALL_UNITS: [Unit; 40] = [
    Unit::Dimensionless,
    Unit::J,
    Unit::W,
    Unit::C,
    Unit::K,
    Unit::DeltaC,
    Unit::Kilograms,
    Unit::KilogramsPerSecond,
    Unit::KilogramsPerCubicMetre,
    Unit::KilogramsWaterPerKilogramDryAir,
    Unit::Metres,
    Unit::SquareMetres,
    Unit::CubicMetres,
    Unit::CubicMetresPerSecond,
    Unit::MetresPerSecond,
    Unit::L,
    Unit::WattsPerSquareMetre,
    Unit::WattsPerSquareMetreKelvin,
    Unit::WattsPerKelvin,
    Unit::Pa,
    Unit::PartsPerMillion,
    Unit::Percent,
    Unit::Hours,
    Unit::Minutes,
    Unit::Seconds,
    Unit::Lux,
    Unit::LumensPerWatt,
    Unit::CandelasPerSquareMetre,
    Unit::Degrees,
    Unit::A,
    Unit::V,
    Unit::Ah,
    Unit::KilowattHours,
    Unit::AirChangesPerHour,
    Unit::Clo,
    Unit::JoulesPerKilogram,
    Unit::JoulesPerKilogramKelvin,
    Unit::WattsPerMetreKelvin,
    Unit::Radians,
    Unit::KilomolesPerSecond,
];

impl Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reporting cadences, ordered finest to coarsest so that a configured
/// minimum frequency can clamp requests with a plain comparison.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum ReportingFrequency {
    EachCall,
    TimeStep,
    #[default]
    Hourly,
    Daily,
    Monthly,
    RunPeriod,
    Yearly,
}

impl ReportingFrequency {
    pub fn label(&self) -> &'static str {
        match self {
            ReportingFrequency::EachCall => "Each Call",
            ReportingFrequency::TimeStep => "TimeStep",
            ReportingFrequency::Hourly => "Hourly",
            ReportingFrequency::Daily => "Daily",
            ReportingFrequency::Monthly => "Monthly",
            ReportingFrequency::RunPeriod => "RunPeriod",
            ReportingFrequency::Yearly => "Annual",
        }
    }

    /// Numeric interval code used by the SQL sink.
    pub fn sql_interval_type(&self) -> i32 {
        match self {
            ReportingFrequency::EachCall => -1,
            ReportingFrequency::TimeStep => 0,
            ReportingFrequency::Hourly => 1,
            ReportingFrequency::Daily => 2,
            ReportingFrequency::Monthly => 3,
            ReportingFrequency::RunPeriod => 4,
            ReportingFrequency::Yearly => 5,
        }
    }

    /// Comment appended to dictionary header lines, declaring the shape of
    /// the data lines that will follow for this cadence.
    pub fn dictionary_suffix(&self) -> &'static str {
        match self {
            ReportingFrequency::EachCall => "!Each Call",
            ReportingFrequency::TimeStep => "!TimeStep",
            ReportingFrequency::Hourly => "!Hourly",
            ReportingFrequency::Daily => "!Daily [Value,Min,Hour,Minute,Max,Hour,Minute]",
            ReportingFrequency::Monthly => {
                "!Monthly [Value,Min,Day,Hour,Minute,Max,Day,Hour,Minute]"
            }
            ReportingFrequency::RunPeriod => {
                "!RunPeriod [Value,Min,Month,Day,Hour,Minute,Max,Month,Day,Hour,Minute]"
            }
            ReportingFrequency::Yearly => {
                "!Annual [Value,Min,Month,Day,Hour,Minute,Max,Month,Day,Hour,Minute]"
            }
        }
    }

    /// Number of fields on a data line for this cadence (the count written
    /// into dictionary headers).
    pub fn data_field_count(&self) -> usize {
        match self {
            ReportingFrequency::EachCall
            | ReportingFrequency::TimeStep
            | ReportingFrequency::Hourly => 1,
            ReportingFrequency::Daily => 7,
            ReportingFrequency::Monthly => 9,
            ReportingFrequency::RunPeriod | ReportingFrequency::Yearly => 11,
        }
    }
}

impl Display for ReportingFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for ReportingFrequency {
    type Err = UnknownFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detailed" | "each call" | "eachcall" => Ok(ReportingFrequency::EachCall),
            "timestep" | "zone timestep" => Ok(ReportingFrequency::TimeStep),
            "hourly" => Ok(ReportingFrequency::Hourly),
            "daily" => Ok(ReportingFrequency::Daily),
            "monthly" => Ok(ReportingFrequency::Monthly),
            "runperiod" | "run period" | "environment" => Ok(ReportingFrequency::RunPeriod),
            "annual" | "yearly" => Ok(ReportingFrequency::Yearly),
            _ => Err(UnknownFrequencyError(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown reporting frequency '{0}'")]
pub struct UnknownFrequencyError(pub String);

/// Storage/aggregation mode for a report variable: time-weighted mean over
/// the reporting window versus a running total.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum StoreType {
    Averaged,
    Summed,
}

impl Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::Averaged => write!(f, "Average"),
            StoreType::Summed => write!(f, "Sum"),
        }
    }
}

/// Whether a report variable carries real or integer values. Aggregation is
/// identical; the kind only affects how emitted values are rendered.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum VariableKind {
    #[default]
    Real,
    Integer,
}

/// Render a value for the text streams. Zero prints as a literal "0.0" to
/// avoid scientific notation on the overwhelmingly common zero case;
/// everything else uses shortest round-trip formatting.
pub fn format_value(value: f64, kind: VariableKind) -> String {
    match kind {
        VariableKind::Integer => format!("{}", value.round() as i64),
        VariableKind::Real => {
            if value == 0.0 {
                "0.0".to_string()
            } else {
                format!("{value}")
            }
        }
    }
}
