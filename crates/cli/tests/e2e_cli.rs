use assert_cmd::cargo::CommandCargoExt;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn sample_file() -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".csv").unwrap();
    writeln!(file, "1,1000").unwrap();
    writeln!(file, "2,1900").unwrap();
    writeln!(file, "4,3500").unwrap();
    writeln!(file, "8,6000").unwrap();
    file
}

#[test]
fn fit_command_prints_coefficients() -> Result<(), Box<dyn std::error::Error>> {
    let samples = sample_file();
    let output = Command::cargo_bin("retrograde")?
        .arg("fit")
        .arg("--samples")
        .arg(samples.path())
        .output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(&stdout)?;
    assert!(value.get("lambda").is_some());
    assert!(value.get("alpha").is_some());
    assert!(value.get("beta").is_some());
    assert!(value.get("r_squared").is_some());
    Ok(())
}

#[test]
fn fit_command_rejects_too_few_samples() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::with_suffix(".csv")?;
    writeln!(file, "1,1000")?;
    writeln!(file, "2,1900")?;

    let output = Command::cargo_bin("retrograde")?
        .arg("fit")
        .arg("--samples")
        .arg(file.path())
        .output()?;

    assert!(!output.status.success());
    Ok(())
}

#[test]
fn loadtest_command_writes_fit_and_samples() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let output_path = dir.path().join("loadtest.json");

    let status = Command::cargo_bin("retrograde")?
        .arg("loadtest")
        .arg("--max-concurrency")
        .arg("4")
        .arg("--requests-per-level")
        .arg("20")
        .arg("--output")
        .arg(&output_path)
        .status()?;

    assert!(status.success());
    let body = std::fs::read_to_string(&output_path)?;
    let value: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(value["samples"].as_array().unwrap().len(), 4);
    assert!(value["fit"]["lambda"].as_f64().unwrap() > 0.0);
    Ok(())
}
