use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn write_training_data(path: &Path) {
    let mut contents = String::from("x\thour\ty\n");
    for i in 0..60 {
        let x = i as f64 * 0.1;
        let hour = (i % 24) as f64;
        let y = 1.5 * x + (2.0 * std::f64::consts::PI * hour / 24.0).sin();
        contents.push_str(&format!("{x}\t{hour}\t{y}\n"));
    }
    fs::write(path, contents).expect("write training data");
}

const SPEC: &str = r#"
[[splines]]
term = "x"
tag = "trend"
kind = { type = "linear", bias = false }
constraints = [{ type = "monotonic" }]

[[splines]]
term = "hour"
tag = "daily"
kind = { type = "cyclic", order = 1, period = 24.0 }
"#;

#[test]
fn fit_then_predict_round_trip() {
    let exe = env!("CARGO_BIN_EXE_lpspline");
    let tmp = tempdir().expect("tempdir");

    write_training_data(&tmp.path().join("train.tsv"));
    fs::write(tmp.path().join("spec.toml"), SPEC).expect("write spec");

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["fit", "--config", "spec.toml", "--data", "train.tsv"])
        .status()
        .expect("run fit");
    assert!(status.success());
    assert!(tmp.path().join("model.toml").exists());

    let model = fs::read_to_string(tmp.path().join("model.toml")).expect("read model");
    assert!(model.contains("status = \"optimal\""));
    assert!(model.contains("coefficients"));

    fs::write(
        tmp.path().join("new.tsv"),
        "x\thour\n1.0\t6.0\n2.0\t18.0\n",
    )
    .expect("write new data");
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "predict",
            "--model",
            "model.toml",
            "--data",
            "new.tsv",
            "--components",
        ])
        .status()
        .expect("run predict");
    assert!(status.success());

    let predictions = fs::read_to_string(tmp.path().join("predictions.tsv")).expect("read output");
    let mut lines = predictions.lines();
    assert_eq!(lines.next(), Some("prediction\ttrend\tdaily"));

    let rows: Vec<Vec<f64>> = lines
        .map(|line| line.split('\t').map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 2);
    // 1.5 * 1 + sin(pi / 2) and 1.5 * 2 + sin(3 pi / 2)
    let expected = [2.5, 2.0];
    for (row, want) in rows.iter().zip(expected) {
        assert!((row[0] - want).abs() < 1e-4, "{} vs {want}", row[0]);
        assert!((row[0] - row[1] - row[2]).abs() < 1e-9);
    }
}

#[test]
fn incompatible_specification_is_reported() {
    let exe = env!("CARGO_BIN_EXE_lpspline");
    let tmp = tempdir().expect("tempdir");

    write_training_data(&tmp.path().join("train.tsv"));
    fs::write(
        tmp.path().join("spec.toml"),
        r#"
[[splines]]
term = "x"
kind = { type = "linear" }
constraints = [{ type = "convex" }]
"#,
    )
    .expect("write spec");

    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["fit", "--config", "spec.toml", "--data", "train.tsv"])
        .output()
        .expect("run fit");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Linear cannot accept Convex constraint."));
    assert!(!tmp.path().join("model.toml").exists());
}

#[test]
fn missing_feature_column_fails_prediction() {
    let exe = env!("CARGO_BIN_EXE_lpspline");
    let tmp = tempdir().expect("tempdir");

    write_training_data(&tmp.path().join("train.tsv"));
    fs::write(tmp.path().join("spec.toml"), SPEC).expect("write spec");
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["fit", "--config", "spec.toml", "--data", "train.tsv"])
        .status()
        .expect("run fit");
    assert!(status.success());

    fs::write(tmp.path().join("new.tsv"), "x\n1.0\n").expect("write new data");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["predict", "--model", "model.toml", "--data", "new.tsv"])
        .output()
        .expect("run predict");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("hour"));
}
