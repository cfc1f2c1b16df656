use std::{io::Write, sync::atomic::Ordering::SeqCst, time::Duration};

use taskgate::{
    config::{Config, DrillConfig},
    drill::Drill,
};

lazy_static::lazy_static! {
    static ref LOGGER: () = {
        let _ = pretty_env_logger::formatted_builder()
            .is_test(true)
            .parse_filters(&std::env::var("RUST_LOG").unwrap_or_default())
            .try_init();
    };
}

fn setup() {
    lazy_static::initialize(&LOGGER);
}

const CONFIG: &str = r#"
[drill]
concurrency = 100
initially_open = false
# cancel tasks 0, 2, 4, ...
cancel_every = 2
settle_ms = 100
deadline_ms = 1000
"#;

fn quick(concurrency: usize) -> DrillConfig {
    DrillConfig {
        concurrency,
        settle_ms: 50,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_even_tasks_then_open() {
    setup();
    let config: Config = CONFIG.parse().unwrap();
    let drill = Drill::new(config.drill.clone());

    let report = drill.clone().run().await.unwrap();
    assert_eq!(report.passed_before_open, 0);
    assert_eq!(report.cancelled, 50);
    assert_eq!(report.proceeded, 50);
    assert_eq!(report.waiters_left, 0);
    report.check(&config.drill).unwrap();

    assert!(drill.gate.is_open());
    assert_eq!(drill.stats.proceeded.load(SeqCst), 50);
}

#[tokio::test]
async fn test_single_task_is_cancelled() {
    setup();
    let config = quick(1);
    let report = Drill::new(config.clone()).run().await.unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.proceeded, 0);
    report.check(&config).unwrap();
}

#[tokio::test]
async fn test_open_gate_lets_everyone_through() {
    setup();
    let config = DrillConfig {
        initially_open: true,
        ..quick(10)
    };
    let report = Drill::new(config.clone()).run().await.unwrap();
    assert_eq!(report.passed_before_open, 10);
    assert_eq!(report.cancelled, 0);
    report.check(&config).unwrap();
}

#[tokio::test]
async fn test_no_cancellation() {
    setup();
    let config = DrillConfig {
        cancel_every: 0,
        ..quick(10)
    };
    let report = Drill::new(config.clone()).run().await.unwrap();
    assert_eq!(report.proceeded, 10);
    report.check(&config).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_cancels_every_waiter() {
    setup();
    let config = DrillConfig {
        settle_ms: 200,
        ..quick(10)
    };
    let drill = Drill::new(config.clone());
    let run = tokio::spawn(drill.clone().run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    drill.shutdown();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.cancelled, 10);
    assert_eq!(report.proceeded, 0);
    assert!(report.check(&config).is_err());
}

#[test]
fn test_report_check_flags_early_passes() {
    let config = quick(4);
    let report = taskgate::drill::Report {
        concurrency: 4,
        passed_before_open: 1,
        cancelled: 2,
        proceeded: 2,
        waiters_left: 0,
    };
    assert!(report.check(&config).is_err());
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.drill.concurrency, 100);
    assert_eq!(config.drill.settle_ms, 100);
    assert!(Config::from_file("/nonexistent/taskgate.toml").is_err());
}
