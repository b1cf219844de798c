pub mod config;
pub mod hal;
pub mod identity;
pub mod mqtt;
pub mod sampling;
pub mod store;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use rppal::gpio::Gpio;
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use tokio::signal;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{Config, HardwareConfig};
use crate::hal::{Hcsr04Sensor, RelayPump};
use crate::identity::DeviceIdentity;
use crate::mqtt::connection::{ConnectionManager, ConnectionSettings};
use crate::mqtt::handshake::AuthHandshake;
use crate::mqtt::messages::TopicSet;
use crate::mqtt::publisher::TelemetryPublisher;
use crate::mqtt::router::MessageRouter;
use crate::mqtt::sink::RumqttcSink;
use crate::sampling::{SamplerSettings, SamplingTask};
use crate::store::MeasurementStore;
use crate::supervisor::{Heartbeat, RespawnFn, SupervisedTask, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load()?;
    let identity = DeviceIdentity::detect()?;
    info!(device_id = %identity, "tanknode starting");

    let topics = TopicSet::new(&config.broker.topic_prefix, identity.as_str());
    let store = MeasurementStore::new(config.timing.store_lock_timeout());

    // Relay first: the pump must be verifiably OFF before anything is
    // allowed to command it. Failure here halts the daemon outright.
    let gpio = Gpio::new()?;
    let pump = RelayPump::open(&gpio, config.hardware.relay_pin)?;

    let mut options = MqttOptions::new(
        identity.as_str(),
        config.broker.host.clone(),
        config.broker.port,
    );
    options.set_keep_alive(Duration::from_secs(config.broker.keep_alive_secs));
    let (client, event_loop) = AsyncClient::new(options, 64);

    let (link_tx, link_rx) = watch::channel(false);
    let sink = RumqttcSink::new(client.clone(), link_rx);
    let publisher = TelemetryPublisher::new(
        sink,
        store.clone(),
        identity.clone(),
        topics.clone(),
        config.tank.report_threshold_cm,
    );

    // Session-adjacent state that must survive a forced task restart,
    // reached only from the single live connection task.
    let router = Arc::new(Mutex::new(MessageRouter::new(
        identity,
        topics,
        store.clone(),
        pump,
        publisher.clone(),
    )));
    let handshake = Arc::new(Mutex::new(AuthHandshake::new(
        store.clone(),
        config.timing.config_wait(),
    )));
    let event_loop = Arc::new(Mutex::new(event_loop));
    let link_tx = Arc::new(link_tx);

    let sampler_heartbeat = Heartbeat::new();
    let connection_heartbeat = Heartbeat::new();

    let sampler_settings = SamplerSettings {
        sample_period: config.timing.sample_period(),
        tank_height_cm: config.tank.height_cm,
        sensor_offset_cm: config.tank.sensor_offset_cm,
    };
    let sampler = sampler_respawn(
        config.hardware.clone(),
        config.timing.echo_timeout(),
        sampler_settings,
        store,
        publisher.clone(),
        sampler_heartbeat.clone(),
    );
    let connection = connection_respawn(
        client,
        event_loop,
        router,
        handshake,
        publisher,
        link_tx,
        connection_heartbeat.clone(),
        ConnectionSettings {
            retry_delay: config.timing.reconnect_delay(),
        },
    );

    let mut supervisor = Supervisor::new(config.timing.supervisor_period());
    supervisor.supervise(SupervisedTask::spawn(
        "ultrasonic",
        sampler_heartbeat,
        config.timing.task_timeout(),
        sampler,
    ));
    supervisor.supervise(SupervisedTask::spawn(
        "mqtt",
        connection_heartbeat,
        config.timing.task_timeout(),
        connection,
    ));

    let shutdown = supervisor.shutdown_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    supervisor.run().await;
    info!("tanknode stopped");
    Ok(())
}

/// Sampling task factory. The sensor pins are claimed fresh on every
/// (re)spawn; if they are unavailable the instance logs and exits, and
/// the watchdog retries after the task timeout.
fn sampler_respawn(
    hardware: HardwareConfig,
    echo_timeout: Duration,
    settings: SamplerSettings,
    store: MeasurementStore,
    publisher: TelemetryPublisher<RumqttcSink>,
    heartbeat: Heartbeat,
) -> RespawnFn {
    Box::new(move || {
        let hardware = hardware.clone();
        let settings = settings.clone();
        let store = store.clone();
        let publisher = publisher.clone();
        let heartbeat = heartbeat.clone();
        tokio::spawn(async move {
            match Hcsr04Sensor::open(hardware.trigger_pin, hardware.echo_pin, echo_timeout) {
                Ok(sensor) => {
                    SamplingTask::new(sensor, store, publisher, settings, heartbeat)
                        .run()
                        .await;
                }
                Err(error) => {
                    error!(%error, "ultrasonic sensor unavailable, awaiting watchdog retry");
                }
            }
        })
    })
}

/// Connection task factory. The transport pair and the restart-surviving
/// session state are shared into every instance; only the loop state is
/// rebuilt.
#[allow(clippy::too_many_arguments)]
fn connection_respawn(
    client: AsyncClient,
    event_loop: Arc<Mutex<EventLoop>>,
    router: Arc<Mutex<MessageRouter<RelayPump, RumqttcSink>>>,
    handshake: Arc<Mutex<AuthHandshake>>,
    publisher: TelemetryPublisher<RumqttcSink>,
    link_tx: Arc<watch::Sender<bool>>,
    heartbeat: Heartbeat,
    settings: ConnectionSettings,
) -> RespawnFn {
    Box::new(move || {
        let manager = ConnectionManager::new(
            client.clone(),
            event_loop.clone(),
            router.clone(),
            handshake.clone(),
            publisher.clone(),
            link_tx.clone(),
            heartbeat.clone(),
            settings.clone(),
        );
        tokio::spawn(manager.run())
    })
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
