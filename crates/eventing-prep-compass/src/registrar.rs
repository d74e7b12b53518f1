//! Idempotent scenario registration
//!
//! Ensures a scenario exists in the registry and that a runtime is part of
//! it. Every create is preceded by an existence check, and a conflict on
//! create (someone else won the race) counts as success, so re-running the
//! registration never fails or duplicates records.

use std::fmt;
use std::future::Future;

use tracing::{debug, info};

use eventing_prep_common::Error;

use crate::client::RegistryClient;

/// A create-if-absent sub-step of registration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationStep {
    /// Create the scenario itself
    CreateScenario,
    /// Add the runtime to the scenario
    AssignRuntime,
    /// Register the mock application
    RegisterApplication,
    /// Add the mock application to the scenario
    AssignApplication,
}

impl RegistrationStep {
    /// Name of the existence check for this sub-step
    pub fn check_name(&self) -> &'static str {
        match self {
            Self::CreateScenario => "scenario_exists",
            Self::AssignRuntime => "is_runtime_assigned",
            Self::RegisterApplication => "application_id",
            Self::AssignApplication => "is_application_assigned",
        }
    }

    /// Name of the create call for this sub-step
    pub fn create_name(&self) -> &'static str {
        match self {
            Self::CreateScenario => "add_scenario",
            Self::AssignRuntime => "assign_runtime",
            Self::RegisterApplication => "register_application",
            Self::AssignApplication => "assign_application",
        }
    }
}

impl fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.create_name())
    }
}

/// What happened in one create-if-absent sub-step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The record was absent and this call created it
    Performed,
    /// The existence check found the record; no create was issued
    AlreadyPresent,
    /// The record was absent at check time but the create hit a conflict
    ConflictAbsorbed,
}

impl StepOutcome {
    /// True if this invocation created the record
    pub fn performed(&self) -> bool {
        matches!(self, Self::Performed)
    }
}

/// Trace of a scenario registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Outcome of ensuring the scenario exists
    pub scenario: StepOutcome,
    /// Outcome of ensuring the runtime is assigned
    pub runtime: StepOutcome,
}

impl RegistrationReport {
    /// True if the scenario existed before this invocation
    pub fn scenario_preexisted(&self) -> bool {
        self.scenario != StepOutcome::Performed
    }

    /// Sub-steps in execution order with their outcomes
    pub fn trace(&self) -> [(RegistrationStep, StepOutcome); 2] {
        [
            (RegistrationStep::CreateScenario, self.scenario),
            (RegistrationStep::AssignRuntime, self.runtime),
        ]
    }
}

/// Run one check-then-create sub-step.
///
/// `create` is only invoked when `check` reports the record absent. A
/// conflict from `create` is absorbed; any other failure is reported as a
/// registration error naming the sub-step.
pub async fn ensure_present<C, CF, A, AF>(
    step: RegistrationStep,
    check: C,
    create: A,
) -> Result<StepOutcome, Error>
where
    C: FnOnce() -> CF,
    CF: Future<Output = Result<bool, Error>>,
    A: FnOnce() -> AF,
    AF: Future<Output = Result<(), Error>>,
{
    let present = check()
        .await
        .map_err(|e| Error::registration(step.check_name(), e.to_string()))?;
    if present {
        debug!(step = %step, "Already present, skipping create");
        return Ok(StepOutcome::AlreadyPresent);
    }

    match create().await {
        Ok(()) => Ok(StepOutcome::Performed),
        Err(e) if e.is_conflict() => {
            debug!(step = %step, "Create raced with another actor, treating as present");
            Ok(StepOutcome::ConflictAbsorbed)
        }
        Err(e) => Err(Error::registration(step.create_name(), e.to_string())),
    }
}

/// Ensure `scenario` exists and `runtime_id` is assigned to it.
///
/// Issues at most one scenario create and at most one assignment per call.
pub async fn ensure_scenario_registered(
    client: &dyn RegistryClient,
    scenario: &str,
    runtime_id: &str,
) -> Result<RegistrationReport, Error> {
    let scenario_outcome = ensure_present(
        RegistrationStep::CreateScenario,
        || client.scenario_exists(scenario),
        || client.add_scenario(scenario),
    )
    .await?;
    if scenario_outcome == StepOutcome::AlreadyPresent {
        debug!(scenario = %scenario, "Scenario already exists, not registering it again");
    }

    let runtime_outcome = ensure_present(
        RegistrationStep::AssignRuntime,
        || client.is_runtime_assigned(runtime_id, scenario),
        || client.assign_runtime(runtime_id, scenario),
    )
    .await?;

    let report = RegistrationReport {
        scenario: scenario_outcome,
        runtime: runtime_outcome,
    };
    info!(
        scenario = %scenario,
        runtime_id = %runtime_id,
        scenario_outcome = ?report.scenario,
        runtime_outcome = ?report.runtime,
        "Scenario registration complete"
    );
    Ok(report)
}
