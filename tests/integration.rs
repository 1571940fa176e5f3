use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::PathBuf, process::Command};

const CONFIG: &str = r#"
[solver]
max_iter = 10000
time_limit_ms = 1000

[tournament]
mode = "pure"
n_rounds = 50
init_score = 0.0
population = { Hawk = 4, Dove = 3 }

[catalog."Hawk Hawk"]
name = "Hawks"
p1 = [[-1.0]]
p2 = [[-1.0]]

[catalog."Hawk Dove"]
name = "Hawk against dove"
p1 = [[2.0]]
p2 = [[0.0]]

[catalog."Dove Dove"]
name = "Matching pennies"
p1 = [[2.0, 0.0], [0.0, 2.0]]
p2 = [[0.0, 2.0], [2.0, 0.0]]
"#;

#[derive(Deserialize)]
struct History {
    snapshots: Vec<BTreeMap<String, Vec<f64>>>,
    #[allow(dead_code)]
    pairings: Vec<Vec<((String, usize), (String, usize))>>,
}

fn bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_equilibria"))
}

fn run_bin(args: &[&str]) -> bool {
    let output = Command::new(bin())
        .args(args)
        .output()
        .expect("failed to execute command");

    if !output.status.success() {
        let stdout_str = String::from_utf8_lossy(&output.stdout);
        let stderr_str = String::from_utf8_lossy(&output.stderr);
        eprintln!(
            "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
        );
    }
    output.status.success()
}

fn setup_dir(name: &str, config: &str) -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    fs::write(test_dir.join("config.toml"), config).expect("failed to write config file");

    test_dir
}

fn load_history(test_dir: &PathBuf, run_idx: usize) -> History {
    let file = test_dir
        .join(format!("run-{run_idx:04}"))
        .join("scores.msgpack");
    let bytes = fs::read(&file).expect("failed to read scores file");
    rmp_serde::from_slice(&bytes).expect("failed to decode scores file")
}

#[test]
fn basic_workflow() {
    let test_dir = setup_dir("basic_workflow", CONFIG);
    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--sim-dir", test_dir_str, "solve"]));
    assert!(test_dir.join("games.msgpack").is_file());

    assert!(run_bin(&["--sim-dir", test_dir_str, "create", "--seed", "17"]));
    assert!(run_bin(&["--sim-dir", test_dir_str, "create"]));

    let history = load_history(&test_dir, 0);
    assert_eq!(history.snapshots.len(), 51);
    assert_eq!(history.snapshots[0]["Hawk"], vec![0.0; 4]);
    assert_eq!(history.snapshots[0]["Dove"], vec![0.0; 3]);

    assert!(run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]));
    assert!(run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "1"]));

    let history = load_history(&test_dir, 0);
    assert_eq!(history.snapshots.len(), 101);

    assert!(run_bin(&["--sim-dir", test_dir_str, "analyze"]));
    assert!(test_dir.join("run-0001").join("results.msgpack").is_file());

    assert!(run_bin(&["--sim-dir", test_dir_str, "clean"]));
    assert!(!test_dir.join("run-0000").exists());
    assert!(!test_dir.join("games.msgpack").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn seeded_runs_are_reproducible() {
    let test_dir = setup_dir("seeded_runs_are_reproducible", CONFIG);
    let test_dir_str = test_dir.to_str().unwrap();

    assert!(run_bin(&["--sim-dir", test_dir_str, "create", "--seed", "3"]));
    assert!(run_bin(&["--sim-dir", test_dir_str, "create", "--seed", "3"]));

    let run_0 = load_history(&test_dir, 0);
    let run_1 = load_history(&test_dir, 1);
    assert_eq!(run_0.snapshots, run_1.snapshots);

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn incomplete_catalog_is_rejected() {
    let config = CONFIG.replace("[catalog.\"Hawk Dove\"]", "[catalog.\"Hawk Owl\"]");
    let test_dir = setup_dir("incomplete_catalog_is_rejected", &config);
    let test_dir_str = test_dir.to_str().unwrap();

    assert!(!run_bin(&["--sim-dir", test_dir_str, "create"]));
    assert!(!run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]));

    fs::remove_dir_all(&test_dir).ok();
}
