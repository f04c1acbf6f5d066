//! Fit/sample contract across the public API.

use tabgan::{
    ColumnId, DeviceSelection, FlowLoss, Synthesizer, SynthesizerConfig, TabError, Table,
    TrainingTrack,
};

const BATCH: usize = 20;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn table() -> Table {
    let values: Vec<f32> = (0..50)
        .flat_map(|r| [r as f32 / 50.0, (r % 5) as f32, ((r * 13) % 7) as f32])
        .collect();
    Table::labeled(vec!["x".into(), "grade".into(), "bucket".into()], values).unwrap()
}

fn config(track: TrainingTrack) -> SynthesizerConfig {
    SynthesizerConfig {
        embedding_dim: 8,
        generator_dims: vec![16],
        discriminator_dims: vec![16],
        batch_size: BATCH,
        pac: 10,
        epochs: 2,
        training_track: track,
        device: DeviceSelection::Cpu,
        ..Default::default()
    }
}

#[test]
fn sample_returns_exactly_n_rows_on_both_tracks() {
    init_tracing();
    for track in [TrainingTrack::Gan, TrainingTrack::Nf] {
        let mut synth = Synthesizer::new(config(track)).unwrap();
        synth.fit(&table(), &[], None).unwrap();
        for n in [1, BATCH, BATCH + 1, 3 * BATCH - 1] {
            let rows = synth.sample(n, None).unwrap();
            assert_eq!(rows.n_rows(), n, "{track:?} n={n}");
            assert_eq!(rows.n_cols(), 3);
        }
    }
}

#[test]
fn missing_discrete_column_is_named() {
    let mut synth = Synthesizer::new(config(TrainingTrack::Gan)).unwrap();
    let err = synth.fit(&table(), &[ColumnId::from("grade"), ColumnId::from("colour")], None);
    assert_eq!(
        err,
        Err(TabError::InvalidColumns {
            columns: vec!["colour".to_string()]
        })
    );
}

#[test]
fn matrix_indices_are_bound_checked() {
    let matrix = Table::matrix(3, table().values().to_vec()).unwrap();
    let mut synth = Synthesizer::new(config(TrainingTrack::Gan)).unwrap();
    let err = synth.fit(&matrix, &[ColumnId::Index(-1), ColumnId::Index(1), ColumnId::Index(3)], None);
    assert_eq!(
        err,
        Err(TabError::InvalidColumns {
            columns: vec!["-1".to_string(), "3".to_string()]
        })
    );
}

#[test]
fn json_records_fit() {
    let records: Vec<serde_json::Value> = (0..20)
        .map(|r| serde_json::json!({ "a": r as f64 / 20.0, "b": (r % 2) as f64 }))
        .collect();
    let mut synth = Synthesizer::new(config(TrainingTrack::Gan)).unwrap();
    synth
        .fit_json(&serde_json::Value::Array(records), &["b".into()], Some(1))
        .unwrap();
    assert_eq!(synth.generator_losses().len(), 1);
}

#[test]
fn tail_adaptive_flow_track() {
    init_tracing();
    let cfg = SynthesizerConfig {
        flow_loss: FlowLoss::Ta,
        ..config(TrainingTrack::Nf)
    };
    let mut synth = Synthesizer::new(cfg).unwrap();
    synth.fit(&table(), &[], None).unwrap();
    // 50 rows / 20 = 2 steps per epoch
    assert_eq!(synth.generator_losses().len(), 2 * 2);
    assert!(synth.min_loss().unwrap().is_finite());
}
