use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use carrinho::Command;
use carrinho_ctl::controller::{self, Config, Handle};
use carrinho_ctl::Error;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const POLL_PERIOD: Duration = Duration::from_millis(100);

fn status_body(wifi: bool, frente: bool, freio: bool, tras: bool) -> String {
    serde_json::json!({
        "wifiConnected": wifi,
        "ledFrenteDireita": frente,
        "ledFrenteEsquerda": frente,
        "ledFreio": freio,
        "ledTrasDireita": tras,
        "ledTrasEsquerda": tras,
    })
    .to_string()
}

/// A fake car on a local port. Keeps a log of every path it was asked for,
/// serves a settable status body, and can be broken down into answering 500s.
struct MockCar {
    host: String,
    requests: Arc<Mutex<Vec<String>>>,
    status: Arc<Mutex<String>>,
    healthy: Arc<AtomicBool>,
    server: JoinHandle<()>,
}

impl MockCar {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock car");
        let host = listener
            .local_addr()
            .expect("mock car has no address")
            .to_string();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let status = Arc::new(Mutex::new(status_body(true, false, false, false)));
        let healthy = Arc::new(AtomicBool::new(true));

        let server = {
            let requests = Arc::clone(&requests);
            let status = Arc::clone(&status);
            let healthy = Arc::clone(&healthy);

            tokio::spawn(async move {
                loop {
                    let (mut stream, _) = match listener.accept().await {
                        Ok(conn) => conn,
                        Err(_) => return,
                    };

                    let _ = answer(&mut stream, &requests, &status, &healthy).await;
                }
            })
        };

        Self {
            host,
            requests,
            status,
            healthy,
            server,
        }
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn set_status(&self, body: String) {
        *self.status.lock().unwrap() = body;
    }

    fn break_down(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }
}

impl Drop for MockCar {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn answer(
    stream: &mut TcpStream,
    requests: &Mutex<Vec<String>>,
    status: &Mutex<String>,
    healthy: &AtomicBool,
) -> Option<()> {
    let (read, mut write) = stream.split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;
    let path = request_line.split_whitespace().nth(1)?.to_owned();

    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        if line.trim().is_empty() {
            break;
        }
    }

    requests.lock().unwrap().push(path.clone());

    let response = if !healthy.load(Ordering::SeqCst) {
        "HTTP/1.1 500 Internal Server Error\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
            .to_owned()
    } else if path == "/status" {
        let body = status.lock().unwrap().clone();
        format!(
            "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    } else {
        "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n".to_owned()
    };

    write.write_all(response.as_bytes()).await.ok()?;
    Some(())
}

async fn start_controller(car: &MockCar) -> (Handle, broadcast::Sender<()>) {
    let (notify, _) = broadcast::channel(1);

    let config = Config {
        host: car.host(),
        poll_period: POLL_PERIOD,
        request_timeout: Duration::from_millis(500),
    };

    let controller = controller::run(config, notify.subscribe())
        .await
        .expect("controller failed to start");

    (controller, notify)
}

#[tokio::test]
async fn connect_pings_then_polls() {
    let car = MockCar::start().await;
    let (controller, _notify) = start_controller(&car).await;

    controller.connect().await.expect("connect should succeed");

    let state = controller.state();
    assert!(state.connected);
    assert!(
        state.status.wifi_connected,
        "first snapshot lands before connect returns"
    );

    tokio::time::sleep(POLL_PERIOD * 9 / 2).await;

    let requests = car.requests();
    assert_eq!(requests[0], "/ping");
    assert_eq!(requests[1], "/status");
    let polls = requests.iter().filter(|path| *path == "/status").count();
    assert!(polls >= 3, "polling never settled in: {:?}", requests);
}

#[tokio::test]
async fn drive_refreshes_the_snapshot() {
    let car = MockCar::start().await;
    let (controller, _notify) = start_controller(&car).await;
    controller.connect().await.unwrap();

    car.set_status(status_body(true, false, true, false));
    controller.drive(Command::Stop).await.expect("stop should succeed");

    let state = controller.state();
    assert!(
        state.status.led_freio,
        "snapshot refreshed on the heels of the command"
    );
    assert!(car.requests().contains(&"/stop".to_owned()));
}

#[tokio::test]
async fn poll_failure_drops_the_link_and_keeps_the_snapshot() {
    let car = MockCar::start().await;
    let (controller, _notify) = start_controller(&car).await;
    controller.connect().await.unwrap();

    car.break_down();
    tokio::time::sleep(POLL_PERIOD * 3).await;

    let state = controller.state();
    assert!(!state.connected);
    assert!(
        state.status.wifi_connected,
        "stale snapshot survives the dropped link"
    );

    let quiet = car.request_count();
    tokio::time::sleep(POLL_PERIOD * 4).await;
    assert_eq!(car.request_count(), quiet, "no traffic once the poller is gone");
}

#[tokio::test]
async fn failed_command_drops_the_link() {
    let car = MockCar::start().await;
    let (controller, _notify) = start_controller(&car).await;
    controller.connect().await.unwrap();
    let before = controller.state().status;

    car.break_down();
    let error = controller
        .drive(Command::Forward)
        .await
        .expect_err("the car is broken");

    assert!(matches!(error, Error::CarError(_)));
    let state = controller.state();
    assert!(!state.connected);
    assert_eq!(state.status, before, "a failed command never touches the snapshot");
}

#[tokio::test]
async fn address_change_repoints_the_poller() {
    let old_car = MockCar::start().await;
    let new_car = MockCar::start().await;
    let (controller, _notify) = start_controller(&old_car).await;
    controller.connect().await.unwrap();

    controller
        .set_host(new_car.host())
        .await
        .expect("address change should be accepted");

    let stranded = old_car.request_count();
    tokio::time::sleep(POLL_PERIOD * 4).await;

    assert_eq!(old_car.request_count(), stranded, "old car is left alone");
    assert!(new_car.request_count() >= 2, "new car picks up the polling");
    assert_eq!(controller.state().host, new_car.host());
    assert!(
        controller.state().connected,
        "an address change alone never drops the link"
    );
}

#[tokio::test]
async fn drive_is_rejected_while_disconnected() {
    let car = MockCar::start().await;
    let (controller, _notify) = start_controller(&car).await;

    let error = controller
        .drive(Command::Forward)
        .await
        .expect_err("no link, no commands");

    assert!(matches!(error, Error::NotConnected));
    assert_eq!(car.request_count(), 0, "nothing reached the car");
}

#[tokio::test]
async fn auto_mode_needs_a_live_link() {
    let car = MockCar::start().await;
    let (controller, _notify) = start_controller(&car).await;

    assert!(matches!(
        controller.set_auto_mode(true).await,
        Err(Error::NotConnected)
    ));

    controller.connect().await.unwrap();

    assert!(controller.set_auto_mode(true).await.unwrap());
    assert!(controller.state().auto_mode);

    assert!(!controller.set_auto_mode(false).await.unwrap());
    assert!(!controller.state().auto_mode);
}

#[tokio::test]
async fn failed_connect_stays_idle() {
    let car = MockCar::start().await;
    car.break_down();
    let (controller, _notify) = start_controller(&car).await;

    let error = controller.connect().await.expect_err("the car answers 500");

    assert!(matches!(
        error,
        Error::CarError(carrinho::Error::UnexpectedStatus { .. })
    ));
    assert!(!controller.state().connected);

    tokio::time::sleep(POLL_PERIOD * 3).await;
    assert_eq!(car.request_count(), 1, "one failed ping and nothing else");
}

#[tokio::test]
async fn reconnecting_does_not_stack_timers() {
    let car = MockCar::start().await;
    let (controller, _notify) = start_controller(&car).await;

    for _ in 0..3 {
        controller.connect().await.expect("connect should succeed");
    }

    let baseline = car.request_count();
    tokio::time::sleep(POLL_PERIOD * 9 / 2).await;
    let polls = car.request_count() - baseline;

    assert!(polls >= 2, "the surviving timer still polls");
    assert!(
        polls <= 6,
        "three connects must leave exactly one timer, saw {} polls",
        polls
    );
}

#[tokio::test]
async fn blank_address_change_is_rejected_and_harmless() {
    let car = MockCar::start().await;
    let (controller, _notify) = start_controller(&car).await;
    controller.connect().await.unwrap();

    let error = controller
        .set_host("   ".to_owned())
        .await
        .expect_err("a blank address is useless");

    assert!(matches!(
        error,
        Error::CarError(carrinho::Error::EmptyAddress)
    ));
    assert_eq!(controller.state().host, car.host(), "the old address survives");
    assert!(controller.state().connected);
}

#[tokio::test]
async fn shutdown_stops_everything() {
    let car = MockCar::start().await;
    let (controller, notify) = start_controller(&car).await;
    controller.connect().await.unwrap();

    notify.send(()).expect("controller is listening");
    tokio::time::sleep(POLL_PERIOD * 2).await;

    let parked = car.request_count();
    tokio::time::sleep(POLL_PERIOD * 3).await;
    assert_eq!(car.request_count(), parked);

    assert!(matches!(controller.connect().await, Err(Error::SendError)));
}
