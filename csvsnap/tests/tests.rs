use cli_test_dir::*;
use std::{
    env, fs,
    io::{BufRead, BufReader, Write},
    net::TcpListener,
    thread,
};

/// A small sample of the business names register, in Latin-1.
const BUSINESS_NAMES: &[u8] = b"REGISTER_NAME\tBN_NAME\tBN_STATUS\tBN_REG_DT\tBN_STATE_OF_REG\n\
BUSINESS NAMES\tCaf\xE9 Sol\tRegistered\t01/02/2012\tNSW\n\
BUSINESS NAMES\tACME\tCancelled\t14/11/2006\tVIC\n";

/// Serve `body` as a CSV file, exactly once, and return its URL.
fn serve_once(body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut rdr = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            if rdr.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                break;
            }
        }
        let mut stream = rdr.into_inner();
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len(),
        )
        .unwrap();
        stream.write_all(body).unwrap();
    });
    format!("http://{}/business_names.csv", addr)
}

/// Point `csvsnap` at a config directory inside `testdir`.
fn config_dir(testdir: &TestDir) -> String {
    testdir.path("config").display().to_string()
}

#[test]
fn help_flag() {
    let testdir = TestDir::new("csvsnap", "help_flag");
    let output = testdir.cmd().arg("--help").expect_success();
    assert!(output.stdout_str().contains("csvsnap"));
    assert!(output.stdout_str().contains("serve"));
}

#[test]
fn version_flag() {
    let testdir = TestDir::new("csvsnap", "version_flag");
    let output = testdir.cmd().arg("--version").expect_success();
    assert!(output.stdout_str().contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn run_help_flag() {
    let testdir = TestDir::new("csvsnap", "run_help_flag");
    let output = testdir.cmd().args(["run", "--help"]).expect_success();
    assert!(output.stdout_str().contains("EXAMPLE DESTINATIONS:"));
}

#[test]
fn schema_from_local_server() {
    let testdir = TestDir::new("csvsnap", "schema_from_local_server");
    let url = serve_once(BUSINESS_NAMES);
    let output = testdir
        .cmd()
        .env("CSVSNAP_CONFIG_DIR", config_dir(&testdir))
        .args(["schema", "--delimiter=tab", "--source-url", &url])
        .expect_success();
    let schema: serde_json::Value = serde_json::from_str(output.stdout_str()).unwrap();
    let names = schema
        .as_array()
        .unwrap()
        .iter()
        .map(|col| col["name"].as_str().unwrap().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        ["REGISTER_NAME", "BN_NAME", "BN_STATUS", "BN_REG_DT", "BN_STATE_OF_REG"],
    );
    assert!(schema[0]["type"] == "STRING");
    assert!(schema[0]["mode"] == "NULLABLE");
}

#[test]
fn schema_fails_on_latin1_without_fallback() {
    let testdir = TestDir::new("csvsnap", "schema_fails_on_latin1_without_fallback");
    let url = serve_once(BUSINESS_NAMES);
    let output = testdir
        .cmd()
        .env("CSVSNAP_CONFIG_DIR", config_dir(&testdir))
        .args(["schema", "--delimiter=tab", "--no-legacy-fallback", "--source-url", &url])
        .expect_failure();
    assert!(output.stderr_str().contains("decode stage failed"));
}

#[test]
fn run_without_destination_fails() {
    let testdir = TestDir::new("csvsnap", "run_without_destination_fails");
    let output = testdir
        .cmd()
        .env("CSVSNAP_CONFIG_DIR", config_dir(&testdir))
        .env_remove("CSVSNAP_DESTINATION")
        .arg("run")
        .expect_failure();
    assert!(output.stderr_str().contains("no destination given"));
}

#[test]
fn config_set_and_unset() {
    let testdir = TestDir::new("csvsnap", "config_set_and_unset");
    let dir = config_dir(&testdir);
    testdir
        .cmd()
        .env("CSVSNAP_CONFIG_DIR", &dir)
        .args(["config", "set", "destination", "bigquery:my-project:abr.business_names"])
        .expect_success();
    testdir
        .cmd()
        .env("CSVSNAP_CONFIG_DIR", &dir)
        .args(["config", "set", "legacy_fallback", "no"])
        .expect_success();
    testdir.expect_file_contents(
        "config/csvsnap.toml",
        "destination = \"bigquery:my-project:abr.business_names\"\nlegacy_fallback = false\n",
    );

    testdir
        .cmd()
        .env("CSVSNAP_CONFIG_DIR", &dir)
        .args(["config", "unset", "destination"])
        .expect_success();
    let contents = fs::read_to_string(testdir.path("config/csvsnap.toml")).unwrap();
    assert_eq!(contents, "legacy_fallback = false\n");
}

#[test]
fn config_rejects_unknown_keys() {
    let testdir = TestDir::new("csvsnap", "config_rejects_unknown_keys");
    testdir
        .cmd()
        .env("CSVSNAP_CONFIG_DIR", config_dir(&testdir))
        .args(["config", "set", "temporary", "gs://bucket/"])
        .expect_failure();
}

/// The BigQuery table to load in live tests.
fn bq_test_table() -> String {
    env::var("BQ_TEST_TABLE").expect("BQ_TEST_TABLE must be set")
}

/// The Databricks table to load in live tests.
fn databricks_test_table() -> String {
    env::var("DATABRICKS_TEST_TABLE").expect("DATABRICKS_TEST_TABLE must be set")
}

#[test]
#[ignore]
fn run_bigquery() {
    let testdir = TestDir::new("csvsnap", "run_bigquery");
    let table = bq_test_table();
    let url = serve_once(BUSINESS_NAMES);
    testdir
        .cmd()
        .args(["run", "--delimiter=tab", "--source-url", &url, &table])
        .tee_output()
        .expect_success();

    let output = testdir
        .cmd()
        .args(["count", &table])
        .tee_output()
        .expect_success();
    assert_eq!(output.stdout_str().trim(), "2");
}

#[test]
#[ignore]
fn run_databricks() {
    let testdir = TestDir::new("csvsnap", "run_databricks");
    let table = databricks_test_table();
    let url = serve_once(BUSINESS_NAMES);
    let output = testdir
        .cmd()
        .args(["run", "--json", "--delimiter=tab", "--source-url", &url, &table])
        .tee_output()
        .expect_success();
    let report: serde_json::Value = serde_json::from_str(output.stdout_str()).unwrap();
    assert_eq!(report["row_count"], 2);
    assert_eq!(report["encoding"], "latin-1");
}
