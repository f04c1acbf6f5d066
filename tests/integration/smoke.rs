//! Smoke test: verify all crates link and the public surface is reachable.

#[test]
fn core_types_accessible() {
    let table = tabgan::Table::matrix(2, vec![0.0, 1.0, 2.0, 3.0]).unwrap();
    assert_eq!(table.n_rows(), 2);
    let _id = tabgan::ColumnId::from("age");
    let _err = tabgan::TabError::Internal {
        message: "test".to_string(),
    };
}

#[test]
fn defaults_match_documented_configuration() {
    assert_eq!(tabgan::core::DEFAULT_PAC, 10);
    assert_eq!(tabgan::core::DEFAULT_GP_LAMBDA, 10.0);
    assert!(tabgan::core::INITIAL_MIN_LOSS.is_infinite());

    let config = tabgan::SynthesizerConfig::default();
    assert_eq!(config.batch_size % 2, 0);
    assert_eq!(config.batch_size % config.pac, 0);
    assert_eq!(config.training_track, tabgan::TrainingTrack::Gan);
    assert_eq!(config.flow_loss, tabgan::FlowLoss::Ml);
}

#[test]
fn synthesizer_constructs_on_cpu() {
    let config = tabgan::SynthesizerConfig {
        device: tabgan::DeviceSelection::Cpu,
        ..Default::default()
    };
    let synth = tabgan::Synthesizer::new(config).unwrap();
    assert!(synth.device().is_cpu());
    assert!(!synth.is_fitted());
}
