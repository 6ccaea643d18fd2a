//! Display controller.
//!
//! # Responsibilities
//! - Parse named operations into a closed `Operation` set
//! - Consult the power state machine before any power command
//! - Run every command through the retry executor
//! - Feed confirmed readings and failures back into the power state

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::device::power::{PowerDecision, PowerPhase, PowerStateMachine};
use crate::error::ControlError;
use crate::protocol::client::ProtocolClient;
use crate::protocol::types::{ErrorStatus, InputSource, LampStatus, MuteState, PowerStatus};
use crate::resilience::retries::{CommandOutcome, RetryExecutor};

/// Operations a controller can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    PowerOn,
    PowerOff,
    PowerStatus,
    SetInput(InputSource),
    InputStatus,
    LampHours,
    ErrorStatus,
    Mute,
    Unmute,
    MuteStatus,
    Info,
    Inputs,
    Freeze,
    Unfreeze,
    FreezeStatus,
    FilterHours,
    InputName(InputSource),
    ServiceInfo,
}

impl Operation {
    /// Build an operation from its name and optional argument.
    pub fn parse(name: &str, arg: Option<&str>) -> Result<Self, ControlError> {
        let op = match (name, arg) {
            ("set_input", Some(input)) => Operation::SetInput(input.parse()?),
            ("input_name", Some(input)) => Operation::InputName(input.parse()?),
            (name @ ("set_input" | "input_name"), None) => {
                return Err(ControlError::protocol(format!(
                    "{name} requires an input such as 31"
                )))
            }
            (_, Some(extra)) => {
                return Err(ControlError::protocol(format!(
                    "{name} takes no argument, got {extra:?}"
                )))
            }
            ("power_on", None) => Operation::PowerOn,
            ("power_off", None) => Operation::PowerOff,
            ("power_status", None) => Operation::PowerStatus,
            ("input_status", None) => Operation::InputStatus,
            ("lamp_hours", None) => Operation::LampHours,
            ("error_status", None) => Operation::ErrorStatus,
            ("mute", None) => Operation::Mute,
            ("unmute", None) => Operation::Unmute,
            ("mute_status", None) => Operation::MuteStatus,
            ("info", None) => Operation::Info,
            ("inputs", None) => Operation::Inputs,
            ("freeze", None) => Operation::Freeze,
            ("unfreeze", None) => Operation::Unfreeze,
            ("freeze_status", None) => Operation::FreezeStatus,
            ("filter_hours", None) => Operation::FilterHours,
            ("service_info", None) => Operation::ServiceInfo,
            (other, None) => {
                return Err(ControlError::protocol(format!("unknown operation {other:?}")))
            }
        };
        Ok(op)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::PowerOn => "power_on",
            Operation::PowerOff => "power_off",
            Operation::PowerStatus => "power_status",
            Operation::SetInput(_) => "set_input",
            Operation::InputStatus => "input_status",
            Operation::LampHours => "lamp_hours",
            Operation::ErrorStatus => "error_status",
            Operation::Mute => "mute",
            Operation::Unmute => "unmute",
            Operation::MuteStatus => "mute_status",
            Operation::Info => "info",
            Operation::Inputs => "inputs",
            Operation::Freeze => "freeze",
            Operation::Unfreeze => "unfreeze",
            Operation::FreezeStatus => "freeze_status",
            Operation::FilterHours => "filter_hours",
            Operation::InputName(_) => "input_name",
            Operation::ServiceInfo => "service_info",
        }
    }
}

impl FromStr for Operation {
    type Err = ControlError;

    /// Parses `"<name> [arg]"`, e.g. `"set_input 31"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| ControlError::protocol("empty operation"))?;
        let arg = parts.next();
        if let Some(extra) = parts.next() {
            return Err(ControlError::protocol(format!(
                "unexpected argument {extra:?} for {name}"
            )));
        }
        Operation::parse(name, arg)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::SetInput(input) => write!(f, "set_input {input}"),
            Operation::InputName(input) => write!(f, "input_name {input}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Identification strings reported by a display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub manufacturer: String,
    pub product: String,
    pub other: String,
    pub class: String,
}

/// Service details from a class 2 display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub serial_number: String,
    pub software_version: String,
    pub lamp_model: String,
    pub filter_model: String,
}

/// Result payload of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OperationOutput {
    /// A power request was accepted. `command_sent` is false for duplicates.
    PowerRequest {
        phase: PowerPhase,
        command_sent: bool,
    },
    Power(PowerStatus),
    Input(InputSource),
    Lamps(Vec<LampStatus>),
    Errors(ErrorStatus),
    Mute(MuteState),
    Info(DeviceInfo),
    Inputs(Vec<InputSource>),
    Frozen(bool),
    FilterHours(u32),
    InputName(String),
    Service(ServiceInfo),
    Done,
}

/// Controls one display.
#[derive(Debug)]
pub struct DisplayController {
    name: String,
    client: Arc<ProtocolClient>,
    executor: RetryExecutor,
    power: PowerStateMachine,
}

impl DisplayController {
    pub fn new(
        name: impl Into<String>,
        client: Arc<ProtocolClient>,
        executor: RetryExecutor,
        power: PowerStateMachine,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            executor,
            power,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    pub fn power(&self) -> &PowerStateMachine {
        &self.power
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Execute one operation.
    pub async fn execute(&self, operation: Operation) -> CommandOutcome<OperationOutput> {
        let client = &self.client;
        match operation {
            Operation::PowerOn => self.request_power(true).await,
            Operation::PowerOff => self.request_power(false).await,
            Operation::PowerStatus => self.power_status().await,
            Operation::SetInput(input) => self
                .run(operation, || client.set_input(input))
                .await
                .map(|()| OperationOutput::Done),
            Operation::InputStatus => self
                .run(operation, || client.get_input())
                .await
                .map(OperationOutput::Input),
            Operation::LampHours => self
                .run(operation, || client.get_lamp_hours())
                .await
                .map(OperationOutput::Lamps),
            Operation::ErrorStatus => self
                .run(operation, || client.get_errors())
                .await
                .map(OperationOutput::Errors),
            Operation::Mute => self
                .run(operation, || client.set_av_mute(true))
                .await
                .map(|()| OperationOutput::Done),
            Operation::Unmute => self
                .run(operation, || client.set_av_mute(false))
                .await
                .map(|()| OperationOutput::Done),
            Operation::MuteStatus => self
                .run(operation, || client.get_av_mute())
                .await
                .map(OperationOutput::Mute),
            Operation::Info => self
                .run(operation, || read_info(client))
                .await
                .map(OperationOutput::Info),
            Operation::Inputs => self
                .run(operation, || client.get_inputs())
                .await
                .map(OperationOutput::Inputs),
            Operation::Freeze => self
                .run(operation, || client.set_freeze(true))
                .await
                .map(|()| OperationOutput::Done),
            Operation::Unfreeze => self
                .run(operation, || client.set_freeze(false))
                .await
                .map(|()| OperationOutput::Done),
            Operation::FreezeStatus => self
                .run(operation, || client.get_freeze())
                .await
                .map(OperationOutput::Frozen),
            Operation::FilterHours => self
                .run(operation, || client.get_filter_hours())
                .await
                .map(OperationOutput::FilterHours),
            Operation::InputName(input) => self
                .run(operation, || client.get_input_name(input))
                .await
                .map(OperationOutput::InputName),
            Operation::ServiceInfo => self
                .run(operation, || read_service_info(client))
                .await
                .map(OperationOutput::Service),
        }
    }

    async fn run<T, F, Fut>(&self, operation: Operation, op: F) -> CommandOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ControlError>>,
    {
        self.executor
            .execute_with_retry(operation.name(), self.client.as_ref(), op)
            .await
    }

    async fn request_power(&self, on: bool) -> CommandOutcome<OperationOutput> {
        let operation = if on {
            Operation::PowerOn
        } else {
            Operation::PowerOff
        };
        let decision = if on {
            self.power.request_power_on()
        } else {
            self.power.request_power_off()
        };

        match decision {
            PowerDecision::Proceed => {}
            PowerDecision::AlreadyInProgress => {
                tracing::info!(device = %self.name, operation = operation.name(), "Power request already satisfied");
                return local_outcome(
                    operation,
                    Ok(OperationOutput::PowerRequest {
                        phase: self.power.phase(),
                        command_sent: false,
                    }),
                );
            }
            rejected @ PowerDecision::Rejected { .. } => {
                tracing::warn!(
                    device = %self.name,
                    operation = operation.name(),
                    reason = rejected.rejection_reason().unwrap_or_default(),
                    "Power request rejected"
                );
                let err = rejected
                    .into_error()
                    .unwrap_or_else(|| ControlError::protocol("power request rejected"));
                return local_outcome(operation, Err(err));
            }
        }

        let client = &self.client;
        let outcome = self.run(operation, || client.set_power(on)).await;
        if let Err(e) = &outcome.result {
            self.after_failure(e).await;
        }
        outcome.map(|()| OperationOutput::PowerRequest {
            phase: self.power.phase(),
            command_sent: true,
        })
    }

    async fn power_status(&self) -> CommandOutcome<OperationOutput> {
        let client = &self.client;
        let outcome = self
            .run(Operation::PowerStatus, || client.get_power_state())
            .await;
        match &outcome.result {
            Ok(status) => self.power.update_from_query(*status),
            Err(ControlError::Network { .. }) | Err(ControlError::Protocol { code: None, .. }) => {
                self.power.mark_error()
            }
            Err(_) => {}
        }
        outcome.map(OperationOutput::Power)
    }

    /// A `State` rejection means our phase is stale: resync with one query.
    async fn after_failure(&self, error: &ControlError) {
        if !matches!(error, ControlError::State { .. }) {
            self.power.mark_error();
            return;
        }

        let client = &self.client;
        let resync = self
            .executor
            .breaker()
            .call(|| client.get_power_state())
            .await;
        match resync {
            Ok(status) => {
                tracing::debug!(device = %self.name, ?status, "Power state resynchronised");
                self.power.update_from_query(status);
            }
            Err(e) => {
                tracing::debug!(device = %self.name, error = %e, "Power resync failed");
                self.power.mark_error();
            }
        }
    }
}

fn local_outcome(
    operation: Operation,
    result: Result<OperationOutput, ControlError>,
) -> CommandOutcome<OperationOutput> {
    CommandOutcome {
        operation: operation.name().to_string(),
        result,
        attempts: 0,
        elapsed: Duration::ZERO,
    }
}

async fn read_info(client: &ProtocolClient) -> Result<DeviceInfo, ControlError> {
    Ok(DeviceInfo {
        name: client.get_name().await?,
        manufacturer: client.get_manufacturer().await?,
        product: client.get_product().await?,
        other: client.get_other_info().await?,
        class: client.get_class().await?,
    })
}

async fn read_service_info(client: &ProtocolClient) -> Result<ServiceInfo, ControlError> {
    Ok(ServiceInfo {
        serial_number: client.get_serial_number().await?,
        software_version: client.get_software_version().await?,
        lamp_model: client.get_lamp_model().await?,
        filter_model: client.get_filter_model().await?,
    })
}
