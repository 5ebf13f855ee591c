//! Integration tests for the bundled SCPI drivers
//!
//! Loads benches of real driver types over the simulated transport and
//! checks the SCPI traffic each init step produces.

use lab_bench::driver::{Definition, Source};
use lab_bench::registry::DriverRegistry;
use lab_bench::transport::{SimulatedTransport, TcpTransport};
use lab_bench::{BenchError, ConfigurationDocument, ConfigurationLoader, LoadOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const DCDC_BENCH: &str = r#"{
    "v_in": {
        "object": "HP_6632A",
        "definition": "source",
        "address": "GPIB0::5::INSTR",
        "init": [["set_voltage", {"voltage": 12}], ["set_current", {"current": 0.5}], ["on", {}]]
    },
    "v_in_meter": {
        "object": "HP_34401A",
        "definition": "multimeter",
        "address": "GPIB0::22::INSTR",
        "init": [["set_mode", {"mode": "VDC"}], ["set_trigger_source", {"source": "BUS"}],
                 ["set_sample_count", {"count": 3}]]
    },
    "v_out_meter": {
        "object": "Keysight_34461A",
        "definition": "multimeter",
        "address": "TCPIP0::10.0.0.7::inst0::INSTR",
        "kwargs": {"factor": 10.0},
        "init": [["set_mode", {"mode": "VDC"}], ["set_trigger_delay", {}]]
    },
    "scope": {
        "object": "Rigol_DS1000Z",
        "definition": "oscilloscope",
        "address": "USB0::0x1AB1::0x04CE::DS1ZA000000001::INSTR",
        "init": [["set_horizontal_scale", {"scale": 0.001}], ["set_channel_enable", {"channel": 2, "enable": false}],
                 ["trigger_single", {}]]
    }
}"#;

fn loader(transport: &SimulatedTransport) -> ConfigurationLoader {
    let registry = Arc::new(DriverRegistry::with_builtin_drivers().unwrap());
    ConfigurationLoader::new(registry, Arc::new(transport.clone()))
}

#[tokio::test]
async fn test_dcdc_bench_writes_expected_scpi() {
    let transport = SimulatedTransport::new();
    let doc = ConfigurationDocument::from_json_str(DCDC_BENCH).unwrap();

    let bench = loader(&transport).load(doc).await.unwrap();

    assert_eq!(bench.len(), 4);
    assert_eq!(
        transport.writes_to("GPIB0::5::INSTR"),
        vec!["SOUR:VOLT:LEV 12", "SOUR:CURR:LEV 0.5", "OUTP:STAT 1"]
    );
    assert_eq!(
        transport.writes_to("GPIB0::22::INSTR"),
        vec!["CONF:VOLT:DC", "TRIG:SOUR BUS", "SAMP:COUN 3"]
    );
    assert_eq!(
        transport.writes_to("TCPIP0::10.0.0.7::inst0::INSTR"),
        vec!["CONF:VOLT:DC", "TRIG:DELay:AUTO ON"]
    );
    assert_eq!(
        transport.writes_to("USB0::0x1AB1::0x04CE::DS1ZA000000001::INSTR"),
        vec![":TIMebase:SCALe 0.001", ":CHANnel2:DISPlay 0", ":SINGle"]
    );

    bench.release().await.unwrap();
    assert_eq!(transport.open_sessions(), 0);
}

#[tokio::test]
async fn test_typed_access_after_load() {
    let transport = SimulatedTransport::new();
    let doc = ConfigurationDocument::from_json_str(DCDC_BENCH).unwrap();
    let bench = loader(&transport).load(doc).await.unwrap();

    transport.queue_response("GPIB0::5::INSTR", "12.003");
    let v_in = bench.source("v_in").unwrap();
    assert!((v_in.measure_voltage().await.unwrap() - 12.003).abs() < 1e-9);

    transport.queue_response("TCPIP0::10.0.0.7::inst0::INSTR", "+4.98E-01,+5.01E-01");
    let mapper = HashMap::from([("v_out_meter".to_string(), "v_out".to_string())]);
    let readings = bench.multimeters().fetch_all(Some(&mapper), true).await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].0, "v_out");
    assert!((readings[0].1[0] - 4.98).abs() < 1e-9);
    assert!((readings[0].1[1] - 5.01).abs() < 1e-9);

    assert!(bench.oscilloscope("scope").is_some());
    assert!(bench.source("scope").is_none());

    bench.release().await.unwrap();
}

#[tokio::test]
async fn test_identify_reports_every_role() {
    let transport = SimulatedTransport::new();
    transport.queue_response("GPIB0::5::INSTR", "HEWLETT-PACKARD,6632A,0,A.00.01");
    let doc = ConfigurationDocument::from_json_str(DCDC_BENCH).unwrap();
    let loader = loader(&transport).with_options(LoadOptions {
        init_devices: false,
        roles: Some(vec!["v_in".into()]),
        ..LoadOptions::default()
    });

    let bench = loader.load(doc).await.unwrap();
    let replies = bench.identify().await;

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "v_in");
    assert_eq!(replies[0].1.as_ref().unwrap(), "HEWLETT-PACKARD,6632A,0,A.00.01");
    bench.release().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_setpoint_fails_the_load() {
    let transport = SimulatedTransport::new();
    let doc = ConfigurationDocument::from_json_str(
        r#"{
            "dmm": {"object": "HP_34401A", "definition": "multimeter", "address": "GPIB0::22::INSTR"},
            "psu": {"object": "HP_6632A", "definition": "source", "address": "GPIB0::5::INSTR",
                    "init": [["set_voltage", {"voltage": 48}]]}
        }"#,
    )
    .unwrap();

    let err = loader(&transport).load(doc).await.unwrap_err();

    assert_eq!(err.role(), Some("psu"));
    assert!(matches!(err.cause(), BenchError::InitStep { step: 0, .. }));
    assert!(transport.writes_to("GPIB0::5::INSTR").is_empty());
    assert_eq!(transport.open_sessions(), 0);
}

#[tokio::test]
async fn test_identity_check_rejects_wrong_model() {
    let transport = SimulatedTransport::new();
    transport.queue_response("GPIB0::5::INSTR", "AGILENT,E3631A,0,2.1");
    let doc = ConfigurationDocument::from_json_str(
        r#"{"psu": {"object": "HP_6632A", "definition": "source", "address": "GPIB0::5::INSTR",
                    "kwargs": {"verify_identity": true}}}"#,
    )
    .unwrap();

    let err = loader(&transport).load(doc).await.unwrap_err();

    assert!(matches!(err.cause(), BenchError::DriverConstruction { .. }));
    assert_eq!(transport.open_sessions(), 0);
}

#[test]
fn test_check_validates_against_driver_tables() {
    let transport = SimulatedTransport::new();
    let loader = loader(&transport);

    let plan = loader
        .check(&ConfigurationDocument::from_json_str(DCDC_BENCH).unwrap())
        .unwrap();
    assert_eq!(plan.entries.len(), 4);
    assert_eq!(plan.entries[3].definition, Definition::Oscilloscope);
    assert_eq!(plan.entries[1].steps, 3);

    // Common SCPI commands are accepted by every bundled driver.
    let doc = ConfigurationDocument::from_json_str(
        r#"{"psu": {"object": "HP_6632A", "definition": "source", "address": "GPIB0::5::INSTR",
                    "init": [["rst", {}], ["write", {"command": "*CLS"}], ["set_ocp_state", {"state": "on"}]]}}"#,
    )
    .unwrap();
    let err = loader.check(&doc).unwrap_err();
    assert!(matches!(err.cause(), BenchError::ArgumentBinding { step: 2, .. }));
    assert_eq!(transport.opened_count(), 0);
}

#[test]
fn test_oversized_integer_is_an_argument_binding_error() {
    let transport = SimulatedTransport::new();
    let doc = ConfigurationDocument::from_json_str(
        r#"{"dmm": {"object": "HP_34401A", "definition": "multimeter", "address": "GPIB0::22::INSTR",
                    "init": [["set_sample_count", {"count": 18446744073709551615}]]}}"#,
    )
    .unwrap();

    let err = loader(&transport).check(&doc).unwrap_err();

    assert_eq!(err.role(), Some("dmm"));
    assert!(matches!(err.cause(), BenchError::ArgumentBinding { step: 0, .. }));
}

/// Instrument on a local socket that forwards every received line.
async fn spawn_recording_instrument() -> (std::net::SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    (local, rx)
}

#[tokio::test]
async fn test_set_local_init_step_over_tcp_socket() {
    let (local, mut received) = spawn_recording_instrument().await;
    let doc = ConfigurationDocument::from_json_str(&format!(
        r#"{{"dmm": {{"object": "HP_34401A", "definition": "multimeter", "address": "{local}",
                     "init": [["set_mode", {{"mode": "VDC"}}], ["set_local", {{}}]]}}}}"#
    ))
    .unwrap();
    let registry = Arc::new(DriverRegistry::with_builtin_drivers().unwrap());
    let loader = ConfigurationLoader::new(registry, Arc::new(TcpTransport::new()));

    let bench = loader.load(doc).await.unwrap();

    for expected in ["CONF:VOLT:DC", "SYSTem:LOCal"] {
        let line = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, expected);
    }
    assert!(bench.get("dmm").unwrap().report().failures.is_empty());
    bench.release().await.unwrap();
}
