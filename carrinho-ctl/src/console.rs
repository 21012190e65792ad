//! The interactive console: reads short drive commands from stdin and prints
//! whatever the controller publishes.

use carrinho::Command;
use std::future::Future;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

use crate::controller::{self, AppState, Config, Handle};

pub async fn run(config: Config, shutdown: impl Future) -> crate::Result<()> {
    let (notify_shutdown, _) = broadcast::channel(1);
    let controller = controller::run(config, notify_shutdown.subscribe()).await?;

    tokio::spawn(render_loop(controller.watch()));

    let mut console = Console { controller };

    let mut ret = Ok(());

    tokio::select! {
        res = console.run() => {
            if let Err(err) = res {
                error!(cause = %err, "console error");
                ret = Err(err)
            } else {
                info!("console finished");
            }
        }

        _ = shutdown => {
            info!("shutting down");
        }
    }

    drop(notify_shutdown);

    ret
}

struct Console {
    controller: Handle,
}

impl Console {
    async fn run(&mut self) -> crate::Result<()> {
        print_help();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            match parse_line(&line) {
                None => continue,
                Some(Input::Quit) => break,
                Some(input) => self.apply(input).await,
            }
        }

        Ok(())
    }

    async fn apply(&mut self, input: Input) {
        match input {
            Input::Connect => match self.controller.connect().await {
                Ok(()) => println!("conectado! car at {} is listening", self.host()),
                Err(error) => println!("connection failed: {}", error),
            },
            Input::SetHost(host) => match self.controller.set_host(host).await {
                Ok(()) => println!("now pointing at {}", self.host()),
                Err(error) => println!("address rejected: {}", error),
            },
            // The controller would reject these too; answering here keeps the
            // car out of it entirely while the link is down.
            Input::Drive(_) | Input::AutoMode(_) if !self.connected() => {
                println!("not connected, `connect` first");
            }
            Input::Drive(command) => {
                if let Err(error) = self.controller.drive(command).await {
                    println!("command failed: {}", error);
                }
            }
            Input::AutoMode(enabled) => match self.controller.set_auto_mode(enabled).await {
                Ok(true) => println!("auto mode on: frente, parar, trás, parar"),
                Ok(false) => println!("auto mode off"),
                Err(error) => println!("auto mode rejected: {}", error),
            },
            Input::ShowStatus => println!("{}", render_status(&self.controller.state())),
            Input::Help => print_help(),
            Input::Quit => unreachable!("handled by the caller"),
        }
    }

    fn connected(&self) -> bool {
        self.controller.state().connected
    }

    fn host(&self) -> String {
        self.controller.state().host
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Input {
    Connect,
    SetHost(String),
    Drive(Command),
    AutoMode(bool),
    ShowStatus,
    Help,
    Quit,
}

fn parse_line(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;

    let input = match (verb, words.next()) {
        ("connect" | "c", None) => Input::Connect,
        ("ip", Some(host)) => Input::SetHost(host.to_owned()),
        ("w" | "forward", None) => Input::Drive(Command::Forward),
        ("s" | "back" | "backward", None) => Input::Drive(Command::Backward),
        ("a" | "left", None) => Input::Drive(Command::Left),
        ("d" | "right", None) => Input::Drive(Command::Right),
        ("x" | "stop", None) => Input::Drive(Command::Stop),
        ("auto", Some("on")) => Input::AutoMode(true),
        ("auto", Some("off")) => Input::AutoMode(false),
        ("status", None) => Input::ShowStatus,
        ("quit" | "q" | "exit", None) => Input::Quit,
        _ => Input::Help,
    };

    Some(input)
}

/// Prints link transitions and fresh snapshots as the controller publishes
/// them. Ends when the controller does.
async fn render_loop(mut state: watch::Receiver<AppState>) {
    let mut last = state.borrow().clone();

    while state.changed().await.is_ok() {
        let next = state.borrow().clone();

        if next.connected != last.connected {
            if next.connected {
                debug!(host = %next.host, "link up");
            } else {
                println!("lost the car at {}", next.host);
            }
        }

        if next.connected && next.status != last.status {
            println!("{}", render_status(&next));
        }

        last = next;
    }
}

fn render_status(state: &AppState) -> String {
    let s = &state.status;

    format!(
        "[{}] {} {} wifi:{} frente:{}/{} freio:{} tras:{}/{}",
        if state.connected { "up" } else { "down" },
        state.host,
        if state.auto_mode { "auto" } else { "manual" },
        flag(s.wifi_connected),
        flag(s.led_frente_esquerda),
        flag(s.led_frente_direita),
        flag(s.led_freio),
        flag(s.led_tras_esquerda),
        flag(s.led_tras_direita),
    )
}

fn flag(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn print_help() {
    println!("carrinho console");
    println!("  connect        test the link and start watching the car");
    println!("  ip <address>   point at a different car");
    println!("  w/s/a/d        forward/back/left/right");
    println!("  x              stop");
    println!("  auto on|off    toggle the automatic drive flag");
    println!("  status         show the last snapshot");
    println!("  quit");
}
