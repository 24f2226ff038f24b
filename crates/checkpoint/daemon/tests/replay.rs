use checkpoint_daemon::config::TopologyConfig;
use checkpoint_daemon::{CheckpointNode, DaemonConfig, DaemonError, ReplaySummary};
use checkpoint_engine::{DispatchConfig, DispatchMode, EngineConfig};
use checkpoint_types::{DeviceAssignment, Gate, GateId};

fn yard_config() -> DaemonConfig {
    DaemonConfig {
        engine: EngineConfig {
            dispatch: DispatchConfig {
                mode: DispatchMode::Inline,
            },
            ..EngineConfig::default()
        },
        topology: TopologyConfig {
            gates: vec![
                Gate::new(GateId::new(1), "G1").entry(),
                Gate::new(GateId::new(2), "G2").exit(),
            ],
            devices: vec![
                DeviceAssignment::camera("CAM-1", GateId::new(1)),
                DeviceAssignment::scale("SCALE-1", GateId::new(1)),
                DeviceAssignment::camera("CAM-2", GateId::new(2)),
            ],
        },
        ..DaemonConfig::default()
    }
}

const CROSSING: &str = r#"
# truck AB1234 enters, is weighed and leaves
{"kind":"plate","camera_id":"CAM-1","plate":"AB1234"}
{"kind":"weight","scale_id":"SCALE-1","weight":24000}
{"kind":"plate","camera_id":"CAM-99","plate":"AB1234"}
{"kind":"plate","camera_id":"CAM-2","plate":"AB1234"}
"#;

#[tokio::test]
async fn replay_drives_a_full_crossing() {
    let node = CheckpointNode::start(&yard_config()).await.unwrap();

    let summary = node.replay(CROSSING.as_bytes()).await.unwrap();
    assert_eq!(
        summary,
        ReplaySummary {
            readings: 4,
            correlated: 3,
            dropped: 1,
            failed: 0,
        }
    );

    let permits = node.permits().await.unwrap();
    assert_eq!(permits.len(), 1);
    let permit = &permits[0];
    assert_eq!(permit.plate_front, "AB1234");
    assert_eq!(permit.total_weight, 24000.0);
    assert!(permit.is_closed);

    node.shutdown().await;
}

#[tokio::test]
async fn malformed_line_aborts_replay() {
    let node = CheckpointNode::start(&yard_config()).await.unwrap();
    let stream = "{\"kind\":\"plate\",\"camera_id\":\"CAM-1\",\"plate\":\"AB1234\"}\nnot json\n";

    let err = node.replay(stream.as_bytes()).await.unwrap_err();
    assert!(matches!(err, DaemonError::Replay { line: 2, .. }));
}

#[tokio::test]
async fn start_rejects_invalid_topology() {
    let mut config = yard_config();
    config
        .topology
        .devices
        .push(DeviceAssignment::camera("CAM-7", GateId::new(7)));

    let err = CheckpointNode::start(&config).await.err().unwrap();
    assert!(matches!(err, DaemonError::Config(_)));
}
