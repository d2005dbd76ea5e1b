//! One IRC network session: connection lifecycle, registration, and the
//! dispatch loop that feeds server lines into the gline store.
//!
//! A session owns its store for the lifetime of the process but resets it on
//! every reconnect, since the table is only a cache of server truth and the
//! snapshot burst after registration re-primes it.

pub mod registry;

pub use registry::{RegistryError, SessionRegistry};

use crate::config::NetworkConfig;
use crate::engine::{now_ts, ActiveFlag, GlineStore};
use crate::error::EngineError;
use crate::parser::{self, NoticeOutcome};
use crate::proto::{LineCodec, ServerLine};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Seconds to wait before re-sending the oper service login.
const RELOGIN_COOLDOWN_SECS: i64 = 120;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("gline removal is not configured for this network")]
    RemovalNotConfigured,

    #[error("not connected")]
    NotConnected,
}

/// Whether the read loop should keep the process alive after returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Continue,
    Shutdown,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Learned from the welcome reply; gline notices from any other source
    /// are ignored.
    server_name: String,
    /// Network name as announced in the welcome text.
    network_name: String,
    logged_in_to_operserv: bool,
    last_login_attempt: i64,
}

#[derive(Debug)]
pub struct Session {
    config: NetworkConfig,
    store: GlineStore,
    state: RwLock<SessionState>,
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
}

impl Session {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            store: GlineStore::new(),
            state: RwLock::new(SessionState::default()),
            outbound: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn store(&self) -> &GlineStore {
        &self.store
    }

    pub fn is_operserv_logged_in(&self) -> bool {
        self.state.read().logged_in_to_operserv
    }

    /// Matches the configured name or the name learned from the server.
    pub fn matches_network(&self, name: &str) -> bool {
        self.config.network.eq_ignore_ascii_case(name)
            || self.state.read().network_name.eq_ignore_ascii_case(name)
    }

    /// Connect, dispatch until disconnect, repeat. Returns only when a
    /// shutdown command was received in-channel.
    pub async fn run(self: Arc<Self>, shutdown: mpsc::UnboundedSender<()>) {
        loop {
            self.store.reset();
            *self.state.write() = SessionState::default();
            match self.connect_once().await {
                Ok(Disposition::Shutdown) => {
                    info!(network = %self.config.network, "session shut down by command");
                    let _ = shutdown.send(());
                    return;
                }
                Ok(Disposition::Continue) => {
                    info!(network = %self.config.network, "connection closed")
                }
                Err(err) => {
                    warn!(network = %self.config.network, %err, "connection failed")
                }
            }
            tokio::time::sleep(Duration::from_secs(self.config.reconnect_wait_secs)).await;
        }
    }

    async fn connect_once(&self) -> anyhow::Result<Disposition> {
        info!(network = %self.config.network, server = %self.config.server, "connecting");
        let stream = TcpStream::connect(&self.config.server).await?;
        let (mut sink, mut lines) = Framed::new(stream, LineCodec).split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.write() = Some(tx.clone());

        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if sink.send(line).await.is_err() {
                    break;
                }
            }
        });

        // The server answers every PING; no reply within the interval will
        // surface as a write error on the closed socket eventually, and the
        // server drops us on its own ping timeout either way.
        let pinger = {
            let tx = tx.clone();
            let every = Duration::from_secs(self.config.ping_interval_secs);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if tx.send("PING :glinewatch".to_string()).is_err() {
                        break;
                    }
                }
            })
        };

        self.send(format!("NICK {}", self.config.nick));
        self.send(format!(
            "USER {} 0 * :{}",
            self.config.ident, self.config.realname
        ));

        let mut disposition = Disposition::Continue;
        while let Some(next) = lines.next().await {
            match next {
                Ok(line) => {
                    if self.dispatch(&line) == Disposition::Shutdown {
                        disposition = Disposition::Shutdown;
                        break;
                    }
                }
                Err(err) => {
                    warn!(network = %self.config.network, %err, "read error");
                    break;
                }
            }
        }

        // Drop every sender so the writer drains queued lines (the QUIT on
        // shutdown in particular) and exits on its own.
        *self.outbound.write() = None;
        pinger.abort();
        drop(tx);
        let _ = writer.await;
        Ok(disposition)
    }

    fn send(&self, line: String) {
        if let Some(tx) = self.outbound.read().as_ref() {
            let _ = tx.send(line);
        }
    }

    fn dispatch(&self, line: &ServerLine) -> Disposition {
        match line.command() {
            Some("PING") => {
                let payload = line.raw().split_once(' ').map(|(_, p)| p).unwrap_or("");
                self.send(format!("PONG {payload}"));
            }
            Some("001") => self.handle_welcome(line),
            Some("280") => self.handle_snapshot(line.raw()),
            Some("401") => {
                if line
                    .token(3)
                    .is_some_and(|nick| nick.eq_ignore_ascii_case(&self.config.operserv_nick))
                {
                    info!(network = %self.config.network, "oper service is gone");
                    self.state.write().logged_in_to_operserv = false;
                }
            }
            Some("NOTICE") => {
                if self.is_from_oper_service(line) && self.is_auth_success(line.raw()) {
                    info!(network = %self.config.network, "oper service login confirmed");
                    self.state.write().logged_in_to_operserv = true;
                }
                self.apply_notice(line.raw());
            }
            Some("JOIN") => {
                if self.is_from_oper_service(line) && !self.config.operserv_login.is_empty() {
                    info!(network = %self.config.network, "oper service returned, logging in");
                    self.send(self.config.operserv_login.clone());
                    let mut state = self.state.write();
                    state.logged_in_to_operserv = true;
                    state.last_login_attempt = now_ts();
                }
            }
            Some("QUIT") => {
                if self.is_from_oper_service(line) {
                    info!(network = %self.config.network, "oper service quit");
                    self.state.write().logged_in_to_operserv = false;
                }
            }
            Some("PRIVMSG") => return self.handle_privmsg(line),
            _ => {}
        }
        Disposition::Continue
    }

    fn is_from_oper_service(&self, line: &ServerLine) -> bool {
        line.source_nick()
            .is_some_and(|nick| nick.eq_ignore_ascii_case(&self.config.operserv_nick))
    }

    fn is_auth_success(&self, raw: &str) -> bool {
        self.config
            .auth_success_msgs
            .iter()
            .any(|msg| !msg.is_empty() && raw.contains(msg.as_str()))
    }

    fn handle_welcome(&self, line: &ServerLine) {
        {
            let mut state = self.state.write();
            state.server_name = line.source().unwrap_or_default().to_string();
            // "Welcome to the <name> IRC Network, nick!user@host"
            state.network_name = line
                .token(6)
                .unwrap_or_default()
                .trim_end_matches(',')
                .to_string();
            info!(
                network = %self.config.network,
                server = %state.server_name,
                announced = %state.network_name,
                "registered"
            );
        }
        for cmd in &self.config.connect_cmds {
            self.send(cmd.clone());
        }
        // Server notice mask covering gline announcements.
        self.send(format!("MODE {} +s +33280", self.config.nick));
        if !self.config.operserv_login.is_empty() {
            self.send(self.config.operserv_login.clone());
            let mut state = self.state.write();
            state.logged_in_to_operserv = true;
            state.last_login_attempt = now_ts();
        }
        for channel in &self.config.channels {
            self.send(format!("JOIN {channel}"));
        }
        // Request the snapshot burst (numeric 280 per entry).
        self.send_to_oper_service("gline");
    }

    fn handle_snapshot(&self, raw: &str) {
        let snap = match parser::parse_snapshot(raw) {
            Ok(snap) => snap,
            Err(err) => {
                warn!(network = %self.config.network, %err, "bad snapshot line");
                self.report_parse_failure(&err);
                return;
            }
        };
        match self.store.add_or_update(
            &snap.mask,
            snap.expire_ts,
            snap.last_mod_ts,
            &snap.reason,
            ActiveFlag::explicit(snap.active),
            raw,
        ) {
            Ok(_) => {}
            // Hostname masks are routine in the burst and not tracked here.
            Err(err @ (EngineError::InvalidAddress(_) | EngineError::BadMask(_))) => {
                debug!(mask = %snap.mask, code = err.error_code(), %err, "skipping snapshot entry")
            }
            Err(err) => {
                warn!(network = %self.config.network, mask = %snap.mask, code = err.error_code(), %err, line = raw, "rejected snapshot entry")
            }
        }
    }

    fn apply_notice(&self, raw: &str) {
        let server = self.state.read().server_name.clone();
        let event = match parser::parse_server_notice(raw, &server) {
            Ok(NoticeOutcome::NotRelevant) => return,
            Ok(NoticeOutcome::Event(event)) => event,
            Err(err) => {
                warn!(network = %self.config.network, %err, "unparseable gline notice");
                self.report_parse_failure(&err);
                return;
            }
        };
        match self.store.add_or_update(
            &event.mask,
            event.expire_ts,
            now_ts(),
            &event.reason,
            event.active,
            raw,
        ) {
            Ok(outcome) => {
                debug!(network = %self.config.network, mask = %event.mask, ?outcome, "reconciled gline")
            }
            Err(err @ (EngineError::InvalidAddress(_) | EngineError::BadMask(_))) => {
                debug!(mask = %event.mask, code = err.error_code(), %err, "skipping non-IP gline")
            }
            Err(err) => {
                warn!(network = %self.config.network, mask = %event.mask, code = err.error_code(), %err, line = raw, "rejected gline event")
            }
        }
    }

    /// Surface a parse failure in the control channel so opers see grammar
    /// drift without tailing logs. The error display carries the raw line.
    fn report_parse_failure(&self, err: &parser::NoticeParseError) {
        if let Some(channel) = self.config.channels.first() {
            self.send(format!("PRIVMSG {channel} :Cannot parse gline line: {err}"));
        }
    }

    fn handle_privmsg(&self, line: &ServerLine) -> Disposition {
        let Some(target) = line.token(2) else {
            return Disposition::Continue;
        };
        if !target.starts_with('#') {
            return Disposition::Continue;
        }
        let Some(command) = line.token(3) else {
            return Disposition::Continue;
        };
        if command.eq_ignore_ascii_case(":!die") {
            info!(network = %self.config.network, "shutdown requested in {target}");
            self.send("QUIT :shutting down".to_string());
            return Disposition::Shutdown;
        }
        if command.eq_ignore_ascii_case(":!g") {
            if let Some(query) = line.token(4) {
                self.handle_lookup(target, query);
            }
        }
        Disposition::Continue
    }

    fn handle_lookup(&self, channel: &str, query: &str) {
        let (active, inactive) = match self.store.check(query, false) {
            Ok(result) => result,
            Err(err) => {
                self.send(format!("PRIVMSG {channel} :Lookup failed: {err}"));
                return;
            }
        };
        if active.is_empty() && inactive.is_empty() {
            self.send(format!("PRIVMSG {channel} :No match: {query}"));
            return;
        }
        let total = active.len() + inactive.len();
        let mut idx = 0;
        for rec in &active {
            idx += 1;
            self.send(format!(
                "PRIVMSG {channel} :({idx}/{total}) {} (expires in {} hours): {}",
                rec.mask(),
                rec.hours_until_expiration(),
                rec.reason()
            ));
        }
        for rec in &inactive {
            idx += 1;
            if rec.raw_active() {
                let hours_ago =
                    (-rec.seconds_until_expiration() as f64 / 3600.0).ceil() as i64;
                self.send(format!(
                    "PRIVMSG {channel} :({idx}/{total}) EXPIRED: {} (expired {} hours ago, last modified {} hours ago): {}",
                    rec.mask(),
                    hours_ago,
                    rec.hours_since_last_mod(),
                    rec.reason()
                ));
            } else {
                self.send(format!(
                    "PRIVMSG {channel} :({idx}/{total}) DEACTIVATED: {} (last modified {} hours ago): {}",
                    rec.mask(),
                    rec.hours_since_last_mod(),
                    rec.reason()
                ));
            }
        }
    }

    /// Send a command to the oper service, re-authenticating first when the
    /// session believes it is logged out and the cooldown has passed.
    pub fn send_to_oper_service(&self, cmd: &str) {
        if self.config.autologin_if_operserv_missing && !self.config.operserv_login.is_empty() {
            let mut state = self.state.write();
            if !state.logged_in_to_operserv
                && now_ts() - state.last_login_attempt > RELOGIN_COOLDOWN_SECS
            {
                state.last_login_attempt = now_ts();
                drop(state);
                self.send(self.config.operserv_login.clone());
            }
        }
        self.send(format!("PRIVMSG {} :{}", self.config.operserv_nick, cmd));
    }

    /// Ask the oper service to remove a gline, using the configured command
    /// template.
    pub fn request_gline_removal(&self, mask: &str) -> Result<(), SessionError> {
        if self.config.operserv_remgline_cmd.is_empty() {
            return Err(SessionError::RemovalNotConfigured);
        }
        if self.outbound.read().is_none() {
            return Err(SessionError::NotConnected);
        }
        let cmd = self.config.operserv_remgline_cmd.replace("{mask}", mask);
        self.send_to_oper_service(&cmd);
        Ok(())
    }
}
