//! Protocol client for one display.
//!
//! # Responsibilities
//! - Resolve commands against the device family's table before sending
//! - Exchange one command line for one reply line over a pooled session
//! - Decide whether the session survives the exchange
//! - Typed helpers for the supported commands
//!
//! # Design Decisions
//! - No retries here; the executor owns retry policy
//! - A well-formed reply (value, `OK` or `ERRn`) keeps the session; anything else discards it

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ControlError;
use crate::net::connection::Connection;
use crate::net::endpoint::Endpoint;
use crate::net::pool::{ConnectionPool, DeviceConnector, PooledConnection};
use crate::protocol::codec::{decode_reply, Reply};
use crate::protocol::commands::{
    Command, CommandTable, DeviceFamily, EncodedCommand, AVMT, CLSS, ERST, FILT, FREZ, INF1, INF2,
    INFO, INNM, INPT, INST, LAMP, NAME, POWR, RFIL, RLMP, SNUM, SVER,
};
use crate::protocol::types::{
    parse_filter_hours, parse_freeze, parse_input_list, parse_lamps, ErrorStatus, InputSource,
    LampStatus, MuteState, PowerStatus,
};
use crate::resilience::retries::Reconnect;

type DeviceConnection = PooledConnection<DeviceConnector>;

/// Client for one display endpoint.
pub struct ProtocolClient {
    endpoint: Arc<Endpoint>,
    pool: ConnectionPool<DeviceConnector>,
    table: CommandTable,
    pinned: Mutex<Option<DeviceConnection>>,
}

impl ProtocolClient {
    pub fn new(
        endpoint: Arc<Endpoint>,
        pool: ConnectionPool<DeviceConnector>,
        family: DeviceFamily,
    ) -> Self {
        Self {
            endpoint,
            pool,
            table: CommandTable::for_family(family),
            pinned: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn family(&self) -> DeviceFamily {
        self.table.family()
    }

    pub fn pool(&self) -> &ConnectionPool<DeviceConnector> {
        &self.pool
    }

    /// Pin a pooled session to this client. Idempotent.
    pub async fn connect(&self) -> Result<(), ControlError> {
        let mut pinned = self.pinned.lock().await;
        if pinned.is_none() {
            *pinned = Some(self.pool.get_connection().await?);
        }
        Ok(())
    }

    /// Return the pinned session to the pool. Idempotent.
    pub async fn disconnect(&self) {
        if let Some(conn) = self.pinned.lock().await.take() {
            self.pool.release(conn);
        }
    }

    /// Discard the pinned session, if any.
    pub async fn reset(&self) {
        if let Some(conn) = self.pinned.lock().await.take() {
            tracing::debug!(endpoint = %self.endpoint, connection_id = %conn.id(), "Dropping session");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.pinned.lock().await.is_some()
    }

    /// Send one command and decode its reply.
    pub async fn send_command(&self, command: &Command) -> Result<Reply, ControlError> {
        let encoded = self.table.encode(command)?;

        let mut pinned = self.pinned.lock().await;
        if let Some(conn) = pinned.as_mut() {
            let result = exchange(conn, &encoded).await;
            if !keeps_session(&result) {
                *pinned = None;
            }
            return result;
        }
        drop(pinned);

        let mut conn = self.pool.get_connection().await?;
        let result = exchange(&mut conn, &encoded).await;
        if keeps_session(&result) {
            self.pool.release(conn);
        }
        result
    }

    async fn query(&self, name: &'static str) -> Result<String, ControlError> {
        self.send_command(&Command::query(name))
            .await?
            .into_value(name)
    }

    async fn set(&self, name: &'static str, value: impl Into<String>) -> Result<(), ControlError> {
        self.send_command(&Command::set(name, value))
            .await?
            .into_ack(name)
    }

    pub async fn get_power_state(&self) -> Result<PowerStatus, ControlError> {
        PowerStatus::parse(&self.query(POWR).await?)
    }

    pub async fn set_power(&self, on: bool) -> Result<(), ControlError> {
        self.set(POWR, if on { "1" } else { "0" }).await
    }

    pub async fn get_input(&self) -> Result<InputSource, ControlError> {
        self.query(INPT).await?.parse()
    }

    pub async fn set_input(&self, input: InputSource) -> Result<(), ControlError> {
        if !input.supported_by(self.family()) {
            return Err(ControlError::protocol(format!(
                "input {input} is not addressable on {} devices",
                self.family()
            )));
        }
        self.set(INPT, input.to_string()).await
    }

    pub async fn get_lamp_hours(&self) -> Result<Vec<LampStatus>, ControlError> {
        parse_lamps(&self.query(LAMP).await?)
    }

    pub async fn get_errors(&self) -> Result<ErrorStatus, ControlError> {
        ErrorStatus::parse(&self.query(ERST).await?)
    }

    pub async fn get_av_mute(&self) -> Result<MuteState, ControlError> {
        MuteState::parse(&self.query(AVMT).await?)
    }

    pub async fn set_av_mute(&self, muted: bool) -> Result<(), ControlError> {
        self.set(AVMT, MuteState::set_param(muted)).await
    }

    pub async fn get_name(&self) -> Result<String, ControlError> {
        self.query(NAME).await
    }

    pub async fn get_manufacturer(&self) -> Result<String, ControlError> {
        self.query(INF1).await
    }

    pub async fn get_product(&self) -> Result<String, ControlError> {
        self.query(INF2).await
    }

    pub async fn get_other_info(&self) -> Result<String, ControlError> {
        self.query(INFO).await
    }

    pub async fn get_class(&self) -> Result<String, ControlError> {
        self.query(CLSS).await
    }

    pub async fn get_inputs(&self) -> Result<Vec<InputSource>, ControlError> {
        parse_input_list(&self.query(INST).await?)
    }

    // Class 2 only; class 1 tables reject these before any I/O.

    pub async fn get_serial_number(&self) -> Result<String, ControlError> {
        self.query(SNUM).await
    }

    pub async fn get_software_version(&self) -> Result<String, ControlError> {
        self.query(SVER).await
    }

    /// Name the device gives to one input terminal.
    pub async fn get_input_name(&self, input: InputSource) -> Result<String, ControlError> {
        self.send_command(&Command::query_for(INNM, input.to_string()))
            .await?
            .into_value(INNM)
    }

    pub async fn get_filter_hours(&self) -> Result<u32, ControlError> {
        parse_filter_hours(&self.query(FILT).await?)
    }

    /// Replacement lamp model number.
    pub async fn get_lamp_model(&self) -> Result<String, ControlError> {
        self.query(RLMP).await
    }

    /// Replacement filter model number.
    pub async fn get_filter_model(&self) -> Result<String, ControlError> {
        self.query(RFIL).await
    }

    pub async fn get_freeze(&self) -> Result<bool, ControlError> {
        parse_freeze(&self.query(FREZ).await?)
    }

    pub async fn set_freeze(&self, frozen: bool) -> Result<(), ControlError> {
        self.set(FREZ, if frozen { "1" } else { "0" }).await
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("endpoint", &self.endpoint)
            .field("family", &self.table.family())
            .field("revision", &self.table.revision())
            .finish()
    }
}

impl Reconnect for ProtocolClient {
    fn reconnect(&self) -> impl Future<Output = ()> + Send {
        self.reset()
    }
}

async fn exchange(conn: &mut Connection, encoded: &EncodedCommand) -> Result<Reply, ControlError> {
    tracing::trace!(connection_id = %conn.id(), command = encoded.name, "Sending command");
    let line = conn.exchange(&encoded.line).await?;
    decode_reply(encoded.class, encoded.name, &line)
}

/// True if the stream is still in sync after this result.
fn keeps_session(result: &Result<Reply, ControlError>) -> bool {
    match result {
        Ok(_) => true,
        Err(ControlError::State { .. }) => true,
        Err(ControlError::Protocol { code: Some(_), .. }) => true,
        Err(_) => false,
    }
}
