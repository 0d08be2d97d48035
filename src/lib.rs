#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod errors;
pub mod input;
pub mod output;
pub mod simulation_time;

use crate::core::reporting::emission::EmissionLayer;
use crate::core::reporting::meter::{MeterEngine, MeterSpec};
use crate::core::reporting::sinks::{ResultsStore, SqlSink};
use crate::core::reporting::variable::{VariableHandle, VariableRegistry};
use crate::core::reporting::ReportIdGenerator;
use crate::core::schedule::{ScheduleFileLoader, ScheduleRef, ScheduleRegistry};
use crate::core::units::{ReportingFrequency, StoreType, Unit, VariableKind};
use crate::errors::{BesimError, ErrorCollector};
use crate::input::{Input, ScheduleReportLevel};
use crate::output::Output;
use crate::simulation_time::{is_leap_year, SimulationClock};

/// All engine state for one simulation run, independently constructible and
/// torn down by dropping it. Nothing here is shared between runs; concurrent
/// runs each build their own context.
#[derive(Debug)]
pub struct SimulationContext<S: SqlSink> {
    pub clock: SimulationClock,
    pub schedules: ScheduleRegistry,
    pub variables: VariableRegistry,
    pub meters: MeterEngine,
    pub emission: EmissionLayer<S>,
    ids: ReportIdGenerator,
    schedule_report: Option<ScheduleReportLevel>,
    setup_finished: bool,
}

impl<S: SqlSink> SimulationContext<S> {
    /// Compile schedules and output requests from the parsed input. All
    /// validation errors for the pass are accumulated and reported together.
    pub fn from_input(
        input: &Input,
        output: &dyn Output,
        sql: S,
        loader: &dyn ScheduleFileLoader,
    ) -> Result<Self, BesimError> {
        let leap_year = is_leap_year(input.simulation.calendar_year);
        let schedules = ScheduleRegistry::compile(input, loader, leap_year)
            .map_err(BesimError::FailureInScheduleCompilation)?;
        let mut collector = ErrorCollector::new();
        let variables = VariableRegistry::from_input(input, &mut collector);
        collector
            .finish()
            .map_err(BesimError::FailureInReportingSetup)?;
        let clock = SimulationClock::new(
            input.simulation.timesteps_per_hour,
            input.simulation.calendar_year,
        )
        .map_err(BesimError::InvalidRequest)?;
        let emission = EmissionLayer::new(output, sql).map_err(BesimError::InvalidRequest)?;
        Ok(Self {
            clock,
            schedules,
            variables,
            meters: MeterEngine::new(),
            emission,
            ids: ReportIdGenerator::new(),
            schedule_report: input.output_schedules.as_ref().map(|o| o.key),
            setup_finished: false,
        })
    }

    /// Producer-facing registration: creates the report variable (matched
    /// against the user's output requests) and attaches it to every implied
    /// standard meter when meter metadata is given.
    pub fn setup_output_variable(
        &mut self,
        key: &str,
        name: &str,
        units: Unit,
        store_type: StoreType,
        kind: VariableKind,
        meter_spec: Option<&MeterSpec>,
    ) -> anyhow::Result<VariableHandle> {
        let handle = self.variables.setup_variable_with(
            key,
            name,
            units,
            store_type,
            kind,
            meter_spec.is_some(),
            &mut self.schedules,
            &mut self.ids,
        )?;
        if let (Some(spec), Some(variable_id)) = (meter_spec, handle.source_index()) {
            self.meters
                .attach_standard_meters(spec, variable_id, &mut self.variables, &mut self.ids)?;
        }
        Ok(handle)
    }

    /// Resolve custom meter topology and meter requests, then emit every
    /// dictionary header and the setup-time detail reports. Called once,
    /// after all producers have registered and before the first tick.
    pub fn finish_setup(&mut self, input: &Input) -> Result<(), BesimError> {
        let mut collector = ErrorCollector::new();
        self.meters
            .setup_custom_meters(input, &mut self.variables, &mut self.ids, &mut collector);
        self.meters.apply_meter_requests(input, &mut collector);
        collector
            .finish()
            .map_err(BesimError::FailureInReportingSetup)?;

        self.variables
            .write_dictionary(&mut self.emission)
            .map_err(BesimError::FailureInEmission)?;
        self.meters
            .write_dictionary(&mut self.emission)
            .map_err(BesimError::FailureInEmission)?;
        self.meters
            .report_meter_details(&self.variables, self.emission.mtd_writer())
            .map_err(BesimError::FailureInEmission)?;
        if let Some(level) = self.schedule_report {
            self.schedules
                .report_details(self.emission.eio_writer(), level)
                .map_err(BesimError::FailureInEmission)?;
        }
        self.setup_finished = true;
        Ok(())
    }

    /// Refresh the schedule cache for the tick about to run. Producers then
    /// record their values through [`Self::update_variable`].
    pub fn begin_timestep(&mut self) -> anyhow::Result<()> {
        self.schedules.update_all(&self.clock)
    }

    pub fn update_variable(&mut self, handle: VariableHandle, value: f64) -> anyhow::Result<()> {
        self.variables
            .update(handle, value, &self.schedules, &self.clock)
    }

    /// End-of-tick processing in the fixed component order: meter fan-out,
    /// then flush of every window whose boundary this tick closes.
    pub fn report_timestep(&mut self) -> anyhow::Result<()> {
        debug_assert!(self.setup_finished, "finish_setup must run before ticking");
        self.meters.update_all(&self.variables, &self.clock);
        self.variables.flush_and_reset(
            ReportingFrequency::EachCall,
            &mut self.emission,
            &self.clock,
        )?;
        self.variables.flush_and_reset(
            ReportingFrequency::TimeStep,
            &mut self.emission,
            &self.clock,
        )?;
        self.meters.report_timestep(&mut self.emission, &self.clock)?;
        if self.clock.is_end_of_hour() {
            self.variables.flush_and_reset(
                ReportingFrequency::Hourly,
                &mut self.emission,
                &self.clock,
            )?;
            self.meters
                .close_window(ReportingFrequency::Hourly, &mut self.emission, &self.clock)?;
        }
        if self.clock.is_end_of_day() {
            self.variables.flush_and_reset(
                ReportingFrequency::Daily,
                &mut self.emission,
                &self.clock,
            )?;
            self.meters
                .close_window(ReportingFrequency::Daily, &mut self.emission, &self.clock)?;
        }
        if self.clock.is_end_of_month() {
            self.variables.flush_and_reset(
                ReportingFrequency::Monthly,
                &mut self.emission,
                &self.clock,
            )?;
            self.meters
                .close_window(ReportingFrequency::Monthly, &mut self.emission, &self.clock)?;
        }
        if self.clock.is_end_of_year() {
            self.variables.flush_and_reset(
                ReportingFrequency::Yearly,
                &mut self.emission,
                &self.clock,
            )?;
            self.meters
                .close_window(ReportingFrequency::Yearly, &mut self.emission, &self.clock)?;
        }
        Ok(())
    }

    pub fn advance(&mut self) {
        self.clock.advance();
    }

    /// Close the run period, capture final-year totals and flush all sinks.
    pub fn end_run(&mut self) -> anyhow::Result<()> {
        self.variables.flush_and_reset(
            ReportingFrequency::RunPeriod,
            &mut self.emission,
            &self.clock,
        )?;
        self.meters
            .close_window(ReportingFrequency::RunPeriod, &mut self.emission, &self.clock)?;
        self.emission.flush()
    }

    /// Invoked exactly once when the warm-up convergence phase ends, so
    /// warm-up energy does not pollute reported annual totals.
    pub fn complete_warmup(&mut self) {
        self.variables.reset_after_warmup();
        self.meters.reset_after_warmup();
        self.clock.set_warmup(false);
    }

    /// Live setter for externally-driven schedules, used once per tick by an
    /// external actor.
    pub fn set_external_schedule_value(
        &mut self,
        schedule: ScheduleRef,
        value: f64,
    ) -> anyhow::Result<()> {
        self.schedules.set_external_value(schedule, value)
    }

    pub fn results(&self) -> &ResultsStore {
        self.emission.results()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reporting::sinks::InMemorySqlSink;
    use crate::core::schedule::FsFileLoader;
    use crate::input::{EndUseCategory, MeterGroup, ResourceType};
    use crate::output::{FileOutput, SinkOutput};
    use crate::simulation_time::DayType;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use serde_json::json;

    fn demo_input() -> Input {
        serde_json::from_value(json!({
            "Simulation": {"TimestepsPerHour": 4, "CalendarYear": 2017},
            "Schedule:Compact": [{
                "Name": "Office Hours",
                "Fields": [
                    "Through: 12/31",
                    "For: AllDays",
                    "Until: 08:00", "0.0",
                    "Until: 18:00", "1.0",
                    "Until: 24:00", "0.0"
                ]
            }],
            "Output:Variable": [
                {"VariableName": "Lights Electricity Energy", "ReportingFrequency": "Hourly"},
                {"VariableName": "Lights Electricity Energy", "ReportingFrequency": "Daily"}
            ],
            "Output:Meter": [
                {"KeyName": "Electricity:Facility", "ReportingFrequency": "Hourly"}
            ]
        }))
        .unwrap()
    }

    fn lighting_spec() -> MeterSpec {
        MeterSpec {
            resource: ResourceType::Electricity,
            end_use: EndUseCategory::InteriorLights,
            end_use_sub: None,
            group: Some(MeterGroup::Building),
            zone: Some("Zone One".to_string()),
        }
    }

    #[rstest]
    fn one_day_run_reconciles_variables_and_meters() {
        let input = demo_input();
        let mut context =
            SimulationContext::from_input(&input, &SinkOutput, InMemorySqlSink::default(), &FsFileLoader)
                .unwrap();
        let handle = context
            .setup_output_variable(
                "Zone One",
                "Lights Electricity Energy",
                Unit::J,
                StoreType::Summed,
                VariableKind::Real,
                Some(&lighting_spec()),
            )
            .unwrap();
        context.finish_setup(&input).unwrap();
        context.clock.start_day(1, DayType::Sunday).unwrap();

        // constant 10 J per tick across one full day
        for _ in 0..(24 * 4) {
            context.begin_timestep().unwrap();
            context.update_variable(handle, 10.0).unwrap();
            context.report_timestep().unwrap();
            context.advance();
        }
        context.end_run().unwrap();

        let variable_id = context
            .variables
            .find_source("Zone One", "Lights Electricity Energy")
            .unwrap();
        let hourly_id = context
            .variables
            .report_id(variable_id, ReportingFrequency::Hourly)
            .unwrap();
        let hourly = context
            .results()
            .values(ReportingFrequency::Hourly, hourly_id)
            .unwrap();
        assert_eq!(hourly.len(), 24);
        assert!(hourly.iter().all(|&v| v == 40.0));

        let daily_id = context
            .variables
            .report_id(variable_id, ReportingFrequency::Daily)
            .unwrap();
        assert_eq!(
            context.results().values(ReportingFrequency::Daily, daily_id),
            Some([960.0].as_slice())
        );

        // the facility meter reconciles with the variable contributions
        let facility = context.meters.meter_by_name("Electricity:Facility").unwrap();
        let meter_hourly_id = facility.window(ReportingFrequency::Hourly).report_id;
        let meter_hourly = context
            .results()
            .values(ReportingFrequency::Hourly, meter_hourly_id)
            .unwrap();
        assert_eq!(meter_hourly.len(), 24);
        assert!(meter_hourly.iter().all(|&v| v == 40.0));
    }

    #[rstest]
    fn eso_stream_orders_dictionary_stamps_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let output = FileOutput::new(dir.path().to_owned(), "out.{}".to_string());
        let input = demo_input();
        let mut context =
            SimulationContext::from_input(&input, &output, InMemorySqlSink::default(), &FsFileLoader)
                .unwrap();
        let handle = context
            .setup_output_variable(
                "Zone One",
                "Lights Electricity Energy",
                Unit::J,
                StoreType::Summed,
                VariableKind::Real,
                Some(&lighting_spec()),
            )
            .unwrap();
        context.finish_setup(&input).unwrap();
        context.clock.start_day(1, DayType::Sunday).unwrap();
        for _ in 0..4 {
            context.begin_timestep().unwrap();
            context.update_variable(handle, 10.0).unwrap();
            context.report_timestep().unwrap();
            context.advance();
        }
        context.end_run().unwrap();
        drop(context);

        let eso = std::fs::read_to_string(dir.path().join("out.eso")).unwrap();
        let lines: Vec<&str> = eso.lines().collect();
        // dictionary lines (all carrying a [unit]) precede the first
        // timestamp row, which precedes the value rows of its flush
        let first_data = lines.iter().position(|l| !l.contains('[')).unwrap();
        assert!(lines[..first_data].iter().all(|l| l.contains('[')));
        assert!(lines[first_data].starts_with("1,"), "expected a sub-daily stamp row");
        assert!(lines[first_data].ends_with("Sunday"));
        assert!(lines[first_data + 1].ends_with(",40"), "value row must follow its stamp");

        let mtr = std::fs::read_to_string(dir.path().join("out.mtr")).unwrap();
        assert!(mtr.contains("Electricity:Facility [J]"));

        let mtd = std::fs::read_to_string(dir.path().join("out.mtd")).unwrap();
        assert!(mtd.contains("Meters for Zone One:Lights Electricity Energy [J]"));
    }

    #[rstest]
    fn warmup_energy_does_not_pollute_annual_totals() {
        let input = demo_input();
        let mut context =
            SimulationContext::from_input(&input, &SinkOutput, InMemorySqlSink::default(), &FsFileLoader)
                .unwrap();
        let handle = context
            .setup_output_variable(
                "Zone One",
                "Lights Electricity Energy",
                Unit::J,
                StoreType::Summed,
                VariableKind::Real,
                Some(&lighting_spec()),
            )
            .unwrap();
        context.finish_setup(&input).unwrap();
        context.clock.start_day(1, DayType::Sunday).unwrap();
        context.clock.set_warmup(true);

        // a warm-up hour of large values, then convergence
        for _ in 0..4 {
            context.begin_timestep().unwrap();
            context.update_variable(handle, 1000.0).unwrap();
            context.report_timestep().unwrap();
            context.advance();
        }
        context.complete_warmup();

        for _ in 0..4 {
            context.begin_timestep().unwrap();
            context.update_variable(handle, 10.0).unwrap();
            context.report_timestep().unwrap();
            context.advance();
        }
        context.end_run().unwrap();

        // the warm-up hour's 4000 J were cleared; only post-warmup energy
        // remains in the daily window
        let facility = context.meters.meter_by_name("Electricity:Facility").unwrap();
        assert_eq!(facility.window(ReportingFrequency::Daily).value, 40.0);
    }
}
