#[test]
fn reagent_doctor_reports_presence_without_secret_values() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let bin = assert_cmd::cargo::cargo_bin!("reagent");
    let out = std::process::Command::new(bin)
        .args(["doctor", "--history-dir"])
        .arg(tmp.path().join("hist"))
        .env("REAGENT_DOTENV", "0")
        .env("REAGENT_GOOGLE_API_KEY", "very-secret-key")
        .env_remove("GOOGLE_API_KEY")
        .env_remove("REAGENT_GOOGLE_CSE_ID")
        .env_remove("GOOGLE_CSE_ID")
        .env_remove("REAGENT_LLM_PROVIDER")
        .env_remove("REAGENT_OLLAMA_MODEL")
        .env("REAGENT_RENDER_DISABLE", "1")
        .output()
        .expect("run reagent doctor");

    assert!(out.status.success(), "reagent doctor failed");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(!s.contains("very-secret-key"), "doctor leaked a secret");
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse doctor json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["name"].as_str(), Some("reagent"));
    assert!(v.get("elapsed_ms").is_some());

    assert_eq!(v["configured"]["search"]["google_api_key"].as_bool(), Some(true));
    assert_eq!(v["configured"]["search"]["google_cse_id"].as_bool(), Some(false));
    assert_eq!(v["configured"]["llm"]["provider"].as_str(), Some("ollama"));
    assert_eq!(v["configured"]["llm"]["model"].as_str(), Some("granite3.3:2b"));
    assert_eq!(v["configured"]["render"]["enabled"].as_bool(), Some(false));

    let checks = v["checks"].as_array().expect("checks array");
    let search = checks
        .iter()
        .find(|c| c["name"].as_str() == Some("search_configured"))
        .expect("search_configured check");
    assert_eq!(search["ok"].as_bool(), Some(false));
    let hist = checks
        .iter()
        .find(|c| c["name"].as_str() == Some("history_dir_writable"))
        .expect("history_dir_writable check");
    assert_eq!(hist["ok"].as_bool(), Some(true));
    assert_eq!(v["ok"].as_bool(), Some(false));
}
