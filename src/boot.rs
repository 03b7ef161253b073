//! The startup handshake with the name service: `verify_gateway` with the
//! gateway's configuration and address, then `hostnames` for the roster.
//!
//! ```text
//! boot_verify_config --start--> [session] --done--> boot_session_done
//! boot_session_done --verification_response--> boot_check_verification
//! boot_check_verification --done--> boot_get_devices --start--> [session]
//! boot_session_done --devices_response--> boot_done
//! ```

use std::net::SocketAddr;

use futures::{future::LocalBoxFuture, FutureExt};
use tracing::{info, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    poll::{self, Device},
    protocol::{Method, Request, Value},
    runtime::{drive, Cooperative},
    session::{self, HasSession, NetOp, SessionContext},
    state::{Blueprint, EdgeDef, StateDef, StateMachine, Transition},
};

const VERIFY_CONFIG: &str = "boot_verify_config";
const SESSION_DONE: &str = "boot_session_done";
const CHECK_VERIFICATION: &str = "boot_check_verification";
const GET_DEVICES: &str = "boot_get_devices";
const DONE: &str = "boot_done";

pub struct BootContext {
    session: SessionContext,
    config: Value,
    own_addr: SocketAddr,
    roster: Vec<Device>,
}

impl HasSession for BootContext {
    fn session(&mut self) -> &mut SessionContext {
        &mut self.session
    }
}

impl Cooperative for BootContext {
    type Pending = NetOp;

    fn complete(&mut self, op: NetOp) -> LocalBoxFuture<'_, Result<&'static str>> {
        self.session.complete(op).boxed_local()
    }
}

fn verify_config(ctx: &mut BootContext) -> Result<Transition<NetOp>> {
    let own = Value::array([
        Value::from(ctx.own_addr.ip().to_string()),
        Value::from(ctx.own_addr.port()),
    ]);
    ctx.session.request(Request::new(
        Method::VerifyGateway,
        vec![ctx.config.clone(), own],
    ));
    Ok(Transition::Fire("start"))
}

fn session_done(ctx: &mut BootContext) -> Result<Transition<NetOp>> {
    let sent = ctx
        .session
        .write_payload
        .as_ref()
        .ok_or_else(|| Error::NotFound("request".to_owned()))?;
    match Method::try_from(sent.method.as_str())? {
        Method::VerifyGateway => Ok(Transition::Fire("verification_response")),
        Method::Hostnames => Ok(Transition::Fire("devices_response")),
        other => Err(Error::Protocol(format!(
            "boot session answered unexpected method {other}"
        ))),
    }
}

fn check_verification(ctx: &mut BootContext) -> Result<Transition<NetOp>> {
    let verified = ctx.session.take_response()?.into_result()?.as_flag()?;
    if !verified {
        warn!(nameservice = %ctx.session.addr(), "configuration rejected");
        return Err(Error::VerificationRejected);
    }
    Ok(Transition::Fire("done"))
}

fn get_devices(ctx: &mut BootContext) -> Result<Transition<NetOp>> {
    ctx.session.request(Request::new(Method::Hostnames, vec![]));
    Ok(Transition::Fire("start"))
}

fn done(ctx: &mut BootContext) -> Result<Transition<NetOp>> {
    let hostnames = ctx.session.take_response()?.into_result()?;
    ctx.roster = poll::parse_roster(&hostnames, ctx.session.addr())?;
    Ok(Transition::Halt)
}

pub fn machine() -> Result<StateMachine<BootContext, NetOp>> {
    Blueprint::<BootContext, NetOp>::new()
        .states(&[
            StateDef::new(VERIFY_CONFIG, verify_config),
            StateDef::new(SESSION_DONE, session_done),
            StateDef::new(CHECK_VERIFICATION, check_verification),
            StateDef::new(GET_DEVICES, get_devices),
            StateDef::new(DONE, done),
        ])
        .include(session::blueprint())
        .edges(&[
            EdgeDef::new("start", VERIFY_CONFIG, session::CONNECTING),
            EdgeDef::new("start", GET_DEVICES, session::CONNECTING),
            EdgeDef::new("done", session::CLOSING, SESSION_DONE),
            EdgeDef::new("verification_response", SESSION_DONE, CHECK_VERIFICATION),
            EdgeDef::new("done", CHECK_VERIFICATION, GET_DEVICES),
            EdgeDef::new("devices_response", SESSION_DONE, DONE),
        ])
        .build()
}

/// Verifies the configuration with the name service and fetches the roster.
pub async fn handshake(config: &Config, own_addr: SocketAddr) -> Result<Vec<Device>> {
    let machine = machine()?;
    let mut ctx = BootContext {
        session: SessionContext::new(config.nameservice),
        config: config.to_value(),
        own_addr,
        roster: Vec::new(),
    };
    drive(&machine, &mut ctx).await?;
    info!(devices = ctx.roster.len(), nameservice = %config.nameservice, "roster received");
    Ok(ctx.roster)
}

/// [`handshake`] on its own single-threaded event loop.
pub fn run(config: &Config, own_addr: SocketAddr) -> Result<Vec<Device>> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::EventLoop)?
        .block_on(handshake(config, own_addr))
}
