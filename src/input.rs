use serde::{Deserialize, Serialize};
use serde_enum_str::Deserialize_enum_str;
use std::fmt::{Display, Formatter};
use std::io::Read;

pub fn ingest(json: impl Read) -> Result<Input, anyhow::Error> {
    Ok(serde_json::from_reader(json)?)
}

/// The full set of input objects this subsystem consumes, already parsed out
/// of the input-definitions file. Field physics lives upstream; these are
/// plain rows.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Input {
    #[serde(rename = "Simulation", default)]
    pub simulation: SimulationConfig,
    #[serde(rename = "ScheduleTypeLimits", default)]
    pub schedule_type_limits: Vec<ScheduleTypeLimitsInput>,
    #[serde(rename = "Schedule:Day:Hourly", default)]
    pub day_schedules_hourly: Vec<DayScheduleHourlyInput>,
    #[serde(rename = "Schedule:Day:Interval", default)]
    pub day_schedules_interval: Vec<DayScheduleIntervalInput>,
    #[serde(rename = "Schedule:Day:List", default)]
    pub day_schedules_list: Vec<DayScheduleListInput>,
    #[serde(rename = "Schedule:Week:Daily", default)]
    pub week_schedules_daily: Vec<WeekScheduleDailyInput>,
    #[serde(rename = "Schedule:Week:Compact", default)]
    pub week_schedules_compact: Vec<WeekScheduleCompactInput>,
    #[serde(rename = "Schedule:Year", default)]
    pub year_schedules: Vec<YearScheduleInput>,
    #[serde(rename = "Schedule:Compact", default)]
    pub compact_schedules: Vec<CompactScheduleInput>,
    #[serde(rename = "Schedule:File", default)]
    pub file_schedules: Vec<FileScheduleInput>,
    #[serde(rename = "Schedule:File:Shading", default)]
    pub shading_file_schedules: Vec<ShadingFileInput>,
    #[serde(rename = "Schedule:Constant", default)]
    pub constant_schedules: Vec<ConstantScheduleInput>,
    #[serde(rename = "ExternalInterface:Schedule", default)]
    pub external_schedules: Vec<ExternalScheduleInput>,
    #[serde(
        rename = "ExternalInterface:FunctionalMockupUnitImport:To:Schedule",
        default
    )]
    pub fmu_import_schedules: Vec<ExternalScheduleInput>,
    #[serde(
        rename = "ExternalInterface:FunctionalMockupUnitExport:To:Schedule",
        default
    )]
    pub fmu_export_schedules: Vec<ExternalScheduleInput>,
    #[serde(rename = "Output:Variable", default)]
    pub output_variables: Vec<OutputVariableRequestInput>,
    #[serde(rename = "Output:Meter", default)]
    pub output_meters: Vec<OutputMeterRequestInput>,
    #[serde(rename = "Output:Meter:Cumulative", default)]
    pub output_meters_cumulative: Vec<OutputMeterRequestInput>,
    #[serde(rename = "Meter:Custom", default)]
    pub custom_meters: Vec<CustomMeterInput>,
    #[serde(rename = "Meter:CustomDecrement", default)]
    pub custom_decrement_meters: Vec<CustomDecrementMeterInput>,
    #[serde(rename = "Output:Schedules", default)]
    pub output_schedules: Option<OutputSchedulesInput>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct SimulationConfig {
    #[serde(default = "default_timesteps_per_hour")]
    pub timesteps_per_hour: usize,
    #[serde(default = "default_calendar_year")]
    pub calendar_year: i32,
    /// Frequency requests finer than this are clamped up to it.
    #[serde(default)]
    pub minimum_reporting_frequency: Option<String>,
}

fn default_timesteps_per_hour() -> usize {
    4
}

fn default_calendar_year() -> i32 {
    2017
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timesteps_per_hour: default_timesteps_per_hour(),
            calendar_year: default_calendar_year(),
            minimum_reporting_frequency: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ScheduleTypeLimitsInput {
    pub name: String,
    pub lower_limit: Option<f64>,
    pub upper_limit: Option<f64>,
    #[serde(default)]
    pub numeric_type: NumericType,
    pub unit_type: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum NumericType {
    #[default]
    Continuous,
    Discrete,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct DayScheduleHourlyInput {
    pub name: String,
    pub schedule_type_limits: Option<String>,
    /// One value per clock hour, replicated to every sub-hour step.
    pub hourly_values: Vec<f64>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum InterpolationInput {
    #[default]
    No,
    Average,
    Linear,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct UntilEntry {
    /// "HH:MM" end-of-interval time, exclusive of the next interval.
    pub until: String,
    pub value: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct DayScheduleIntervalInput {
    pub name: String,
    pub schedule_type_limits: Option<String>,
    #[serde(default)]
    pub interpolate: InterpolationInput,
    pub intervals: Vec<UntilEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct DayScheduleListInput {
    pub name: String,
    pub schedule_type_limits: Option<String>,
    #[serde(default)]
    pub interpolate: InterpolationInput,
    pub minutes_per_item: u32,
    pub values: Vec<f64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct WeekScheduleDailyInput {
    pub name: String,
    pub sunday: String,
    pub monday: String,
    pub tuesday: String,
    pub wednesday: String,
    pub thursday: String,
    pub friday: String,
    pub saturday: String,
    pub holiday: String,
    pub summer_design_day: String,
    pub winter_design_day: String,
    #[serde(rename = "CustomDay1")]
    pub custom_day1: String,
    #[serde(rename = "CustomDay2")]
    pub custom_day2: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct WeekCompactEntry {
    /// Day-type list, e.g. "Weekdays SummerDesignDay" or "AllOtherDays".
    pub for_days: String,
    pub day_schedule: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct WeekScheduleCompactInput {
    pub name: String,
    pub entries: Vec<WeekCompactEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct YearPeriod {
    pub week_schedule: String,
    pub start_month: u32,
    pub start_day: u32,
    pub end_month: u32,
    pub end_day: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct YearScheduleInput {
    pub name: String,
    pub schedule_type_limits: Option<String>,
    pub periods: Vec<YearPeriod>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CompactScheduleInput {
    pub name: String,
    pub schedule_type_limits: Option<String>,
    /// The textual DSL: repeated "Through: <date>" / "For: <day types>" /
    /// ["Interpolate: <mode>" /] "Until: <time>" / "<value>" fields in order.
    pub fields: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum ColumnSeparator {
    #[default]
    Comma,
    Semicolon,
    Tab,
    Space,
}

impl ColumnSeparator {
    pub fn as_byte(&self) -> u8 {
        match self {
            ColumnSeparator::Comma => b',',
            ColumnSeparator::Semicolon => b';',
            ColumnSeparator::Tab => b'\t',
            ColumnSeparator::Space => b' ',
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FileScheduleInput {
    pub name: String,
    pub schedule_type_limits: Option<String>,
    pub file_name: String,
    /// 1-based column holding this schedule's values.
    pub column_number: usize,
    #[serde(default)]
    pub rows_to_skip: usize,
    /// 8760 or 8784; defaults by leap-year flag when absent.
    pub number_of_hours: Option<u32>,
    #[serde(default)]
    pub column_separator: ColumnSeparator,
    #[serde(default)]
    pub interpolate: InterpolationInput,
    /// Sub-hourly granularity of the file rows; defaults to one row per hour.
    pub minutes_per_item: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ShadingFileInput {
    pub file_name: String,
    #[serde(default)]
    pub rows_to_skip: usize,
    pub minutes_per_item: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ConstantScheduleInput {
    pub name: String,
    pub schedule_type_limits: Option<String>,
    pub hourly_value: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ExternalScheduleInput {
    pub name: String,
    pub schedule_type_limits: Option<String>,
    /// Value used until the external actor first pushes one.
    pub initial_value: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct OutputVariableRequestInput {
    #[serde(default = "default_key_value")]
    pub key_value: String,
    pub variable_name: String,
    #[serde(default = "default_reporting_frequency")]
    pub reporting_frequency: String,
    pub schedule_name: Option<String>,
}

fn default_key_value() -> String {
    "*".to_string()
}

fn default_reporting_frequency() -> String {
    "Hourly".to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct OutputMeterRequestInput {
    pub key_name: String,
    #[serde(default = "default_reporting_frequency")]
    pub reporting_frequency: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CustomMeterEntry {
    pub key_name: Option<String>,
    pub output_variable_or_meter_name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CustomMeterInput {
    pub name: String,
    pub fuel_type: ResourceType,
    pub entries: Vec<CustomMeterEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CustomDecrementMeterInput {
    pub name: String,
    pub fuel_type: ResourceType,
    pub source_meter_name: String,
    pub entries: Vec<CustomMeterEntry>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum ScheduleReportLevel {
    Hourly,
    Timestep,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct OutputSchedulesInput {
    pub key: ScheduleReportLevel,
}

/// Closed resource-type vocabulary for meters. Free text that matches none of
/// the canonical names is captured whole and rejected at meter setup with the
/// "Illegal ResourceType Entered" diagnostic.
#[derive(Clone, Debug, Deserialize_enum_str, Eq, Hash, PartialEq)]
pub enum ResourceType {
    Electricity,
    NaturalGas,
    Gasoline,
    Diesel,
    Coal,
    FuelOilNo1,
    FuelOilNo2,
    Propane,
    Water,
    OnSiteWater,
    MainsWater,
    RainWater,
    WellWater,
    Condensate,
    EnergyTransfer,
    Steam,
    DistrictHeating,
    DistrictCooling,
    ElectricityProduced,
    SolarWater,
    SolarAir,
    #[serde(other)]
    Other(String),
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResourceType::Electricity => "Electricity",
            ResourceType::NaturalGas => "NaturalGas",
            ResourceType::Gasoline => "Gasoline",
            ResourceType::Diesel => "Diesel",
            ResourceType::Coal => "Coal",
            ResourceType::FuelOilNo1 => "FuelOilNo1",
            ResourceType::FuelOilNo2 => "FuelOilNo2",
            ResourceType::Propane => "Propane",
            ResourceType::Water => "Water",
            ResourceType::OnSiteWater => "OnSiteWater",
            ResourceType::MainsWater => "MainsWater",
            ResourceType::RainWater => "RainWater",
            ResourceType::WellWater => "WellWater",
            ResourceType::Condensate => "Condensate",
            ResourceType::EnergyTransfer => "EnergyTransfer",
            ResourceType::Steam => "Steam",
            ResourceType::DistrictHeating => "DistrictHeating",
            ResourceType::DistrictCooling => "DistrictCooling",
            ResourceType::ElectricityProduced => "ElectricityProduced",
            ResourceType::SolarWater => "SolarWater",
            ResourceType::SolarAir => "SolarAir",
            ResourceType::Other(s) => s,
        };
        write!(f, "{label}")
    }
}

/// Closed end-use vocabulary; same fallback behaviour as [`ResourceType`].
#[derive(Clone, Debug, Deserialize_enum_str, Eq, Hash, PartialEq)]
pub enum EndUseCategory {
    Heating,
    Cooling,
    InteriorLights,
    ExteriorLights,
    InteriorEquipment,
    ExteriorEquipment,
    Fans,
    Pumps,
    HeatRejection,
    Humidifier,
    HeatRecovery,
    WaterSystems,
    Refrigeration,
    Cogeneration,
    #[serde(other)]
    Other(String),
}

impl Display for EndUseCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EndUseCategory::Heating => "Heating",
            EndUseCategory::Cooling => "Cooling",
            EndUseCategory::InteriorLights => "InteriorLights",
            EndUseCategory::ExteriorLights => "ExteriorLights",
            EndUseCategory::InteriorEquipment => "InteriorEquipment",
            EndUseCategory::ExteriorEquipment => "ExteriorEquipment",
            EndUseCategory::Fans => "Fans",
            EndUseCategory::Pumps => "Pumps",
            EndUseCategory::HeatRejection => "HeatRejection",
            EndUseCategory::Humidifier => "Humidifier",
            EndUseCategory::HeatRecovery => "HeatRecovery",
            EndUseCategory::WaterSystems => "WaterSystems",
            EndUseCategory::Refrigeration => "Refrigeration",
            EndUseCategory::Cogeneration => "Cogeneration",
            EndUseCategory::Other(s) => s,
        };
        write!(f, "{label}")
    }
}

/// Closed meter-group vocabulary; same fallback behaviour as [`ResourceType`].
#[derive(Clone, Debug, Deserialize_enum_str, Eq, Hash, PartialEq)]
pub enum MeterGroup {
    Building,
    #[serde(rename = "HVAC")]
    Hvac,
    Plant,
    #[serde(other)]
    Other(String),
}

impl Display for MeterGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MeterGroup::Building => "Building",
            MeterGroup::Hvac => "HVAC",
            MeterGroup::Plant => "Plant",
            MeterGroup::Other(s) => s,
        };
        write!(f, "{label}")
    }
}
