fn version_stdout(format: &str) -> String {
    let bin = assert_cmd::cargo::cargo_bin!("reagent");
    let out = std::process::Command::new(bin)
        .args(["version", "--output", format])
        .env("REAGENT_DOTENV", "0")
        .output()
        .expect("run reagent version");
    assert!(out.status.success(), "reagent version --output {format} failed");
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

#[test]
fn json_and_text_version_outputs_agree() {
    let v: serde_json::Value =
        serde_json::from_str(&version_stdout("json")).expect("parse version json");
    assert_eq!(v["kind"].as_str(), Some("version"));
    assert_eq!(v["ok"].as_bool(), Some(true));
    let version = v["version"].as_str().expect("version string");
    assert_eq!(version.split('.').count(), 3, "not semver: {version}");

    assert_eq!(version_stdout("text"), format!("reagent {version}"));
}
