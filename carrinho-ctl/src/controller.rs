//! Owns the link to the car.
//!
//! Every request to the device funnels through a single task here, so drive
//! commands and background polls never race each other: whatever the car
//! answered last is what the published [`AppState`] says.

use carrinho::{Client, Command, Status};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::shutdown::Shutdown;

/// Factory firmware address for cars fresh out of the box.
pub const DEFAULT_HOST: &str = "192.168.1.100";

/// How often the car is asked for a fresh snapshot while the link is up.
pub const POLL_PERIOD: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub poll_period: Duration,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            poll_period: POLL_PERIOD,
            request_timeout: carrinho::DEFAULT_TIMEOUT,
        }
    }
}

/// Everything a front end needs to render, published through a `watch`
/// channel so it can sit on changes instead of asking.
///
/// `status` is the last snapshot the car ever gave us. It survives a dropped
/// link unchanged, so whoever is watching can still see the car's final state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppState {
    pub host: String,
    pub connected: bool,
    pub status: Status,
    pub auto_mode: bool,
}

type Responder<T> = oneshot::Sender<crate::Result<T>>;

#[derive(Debug)]
enum Intent {
    Connect(Responder<()>),
    Drive(Command, Responder<()>),
    SetHost(String, Responder<()>),
    SetAutoMode(bool, Responder<bool>),
    Poll,
}

/// Spawn the controller task and hand back its [`Handle`].
///
/// The controller starts out disconnected. Nothing touches the network until
/// the first [`Handle::connect`] call.
pub async fn run(config: Config, notify: broadcast::Receiver<()>) -> crate::Result<Handle> {
    let client = Client::with_timeout(config.host.as_str(), config.request_timeout)?;

    let (tx, rx) = mpsc::channel(32);
    let (state, state_rx) = watch::channel(AppState {
        host: config.host.clone(),
        ..AppState::default()
    });

    let controller = Controller {
        config,
        client,
        state,
        poller: None,
        tx: tx.clone(),
        rx,
        shutdown: notify.into(),
    };

    tokio::spawn(async move {
        if let Err(error) = controller.run().await {
            error!(?error, "controller failed");
        }
    });

    Ok(Handle {
        tx,
        state: state_rx,
    })
}

struct Controller {
    config: Config,
    client: Client,
    state: watch::Sender<AppState>,

    /// The active poll timer, if any. Never more than one.
    poller: Option<JoinHandle<()>>,

    tx: mpsc::Sender<Intent>,
    rx: mpsc::Receiver<Intent>,
    shutdown: Shutdown,
}

impl Controller {
    async fn run(mut self) -> crate::Result<()> {
        loop {
            tokio::select! {
                intent = self.rx.recv() => {
                    match intent {
                        Some(intent) => self.handle(intent).await,
                        None => break,
                    }
                }
                _ = self.shutdown.recv() => break,
            }
        }

        self.stop_polling();
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn handle(&mut self, intent: Intent) {
        match intent {
            Intent::Connect(responder) => {
                let _ = responder.send(self.connect().await);
            }
            Intent::Drive(command, responder) => {
                let _ = responder.send(self.drive(command).await);
            }
            Intent::SetHost(host, responder) => {
                let _ = responder.send(self.set_host(host));
            }
            Intent::SetAutoMode(enabled, responder) => {
                let _ = responder.send(self.set_auto_mode(enabled));
            }
            Intent::Poll => self.refresh().await,
        }
    }

    /// Ping the car and, if it answers, mark the link up and fetch a first
    /// snapshot. Polling takes over from there.
    async fn connect(&mut self) -> crate::Result<()> {
        match self.client.ping().await {
            Ok(()) => {
                info!(host = %self.config.host, "car answered the ping");
                self.set_connected(true);
                self.refresh().await;
                Ok(())
            }
            Err(error) => {
                self.set_connected(false);
                Err(error.into())
            }
        }
    }

    /// Fire a drive command at the car, then refresh the snapshot so the
    /// caller sees the outcome straight away.
    async fn drive(&mut self, command: Command) -> crate::Result<()> {
        if !self.connected() {
            return Err(crate::Error::NotConnected);
        }

        match self.client.send(command).await {
            Ok(()) => {
                self.refresh().await;
                Ok(())
            }
            Err(error) => {
                self.set_connected(false);
                Err(error.into())
            }
        }
    }

    /// Point the controller at a different car.
    ///
    /// An address change never drops the link by itself: if we were polling we
    /// keep polling, aimed at the new address, and the next fetch decides
    /// whether anyone is actually there.
    fn set_host(&mut self, host: String) -> crate::Result<()> {
        self.client = Client::with_timeout(host.as_str(), self.config.request_timeout)?;
        self.config.host = host.clone();
        self.state.send_modify(|state| state.host = host);

        if self.connected() {
            self.start_polling();
        }

        Ok(())
    }

    // TODO: drive the firmware's auto endpoint once it grows one
    fn set_auto_mode(&mut self, enabled: bool) -> crate::Result<bool> {
        if !self.connected() {
            return Err(crate::Error::NotConnected);
        }

        self.state.send_modify(|state| state.auto_mode = enabled);
        Ok(enabled)
    }

    /// Fetch a snapshot and publish it wholesale. On failure the link is
    /// dropped but the last snapshot stays visible.
    async fn refresh(&mut self) {
        if !self.connected() {
            return;
        }

        match self.client.status().await {
            Ok(status) => {
                self.state.send_if_modified(|state| {
                    let changed = state.status != status;
                    state.status = status;
                    changed
                });
            }
            Err(error) => {
                warn!(?error, "status fetch failed, dropping the link");
                self.set_connected(false);
            }
        }
    }

    fn connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// Flip the link flag. The poll timer lives exactly as long as the link
    /// is up.
    fn set_connected(&mut self, connected: bool) {
        if connected {
            self.start_polling();
        } else {
            self.stop_polling();
        }

        self.state.send_if_modified(|state| {
            let changed = state.connected != connected;
            state.connected = connected;
            changed
        });
    }

    /// Arm the poll timer, cancelling any previous one first.
    fn start_polling(&mut self) {
        self.stop_polling();

        let period = self.config.poll_period;
        let tx = self.tx.clone();
        self.poller = Some(tokio::spawn(poll_timer(period, tx)));
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

async fn poll_timer(period: Duration, tx: mpsc::Sender<Intent>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick fires immediately, and whoever armed the timer has just
    // fetched. Skip it.
    interval.tick().await;

    loop {
        interval.tick().await;
        if tx.send(Intent::Poll).await.is_err() {
            return;
        }
    }
}

/// Cloneable link to the controller task.
#[derive(Clone, Debug)]
pub struct Handle {
    tx: mpsc::Sender<Intent>,
    state: watch::Receiver<AppState>,
}

impl Handle {
    /// Test the link to the car and start polling if it answers.
    pub async fn connect(&self) -> crate::Result<()> {
        self.request(Intent::Connect).await
    }

    /// Send a drive command. Rejected while disconnected.
    pub async fn drive(&self, command: Command) -> crate::Result<()> {
        self.request(|responder| Intent::Drive(command, responder))
            .await
    }

    /// Re-aim the controller at a different address.
    pub async fn set_host(&self, host: String) -> crate::Result<()> {
        self.request(|responder| Intent::SetHost(host, responder))
            .await
    }

    /// Toggle the automatic drive flag. Rejected while disconnected.
    pub async fn set_auto_mode(&self, enabled: bool) -> crate::Result<bool> {
        self.request(|responder| Intent::SetAutoMode(enabled, responder))
            .await
    }

    /// The current snapshot of everything worth rendering.
    pub fn state(&self) -> AppState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<AppState> {
        self.state.clone()
    }

    async fn request<T>(&self, intent: impl FnOnce(Responder<T>) -> Intent) -> crate::Result<T> {
        let (responder, response) = oneshot::channel();

        self.tx
            .send(intent(responder))
            .await
            .map_err(|_| crate::Error::SendError)?;

        response.await.map_err(|_| crate::Error::RecvError)?
    }
}
