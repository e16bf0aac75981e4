use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::Builder;

fn run_bench(cargo: &str, config: &Path, extra: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- Running lock_bench {:?} ---", extra);
    let output = Command::new(cargo)
        .current_dir(Path::new(env!("CARGO_MANIFEST_DIR")).join(".."))
        .arg("run")
        .arg("--release")
        .arg("--package")
        .arg("lock_bench")
        .arg("--")
        .arg("--config")
        .arg(config)
        .args(extra)
        .output()?;

    println!("lock_bench stdout:\n{}", String::from_utf8_lossy(&output.stdout));
    println!("lock_bench stderr:\n{}", String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        eprintln!("lock_bench failed with status: {}", output.status);
        return Err(Box::new(std::io::Error::new(std::io::ErrorKind::Other, "lock_bench failed")));
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = Builder::new().prefix("tsqueue_lock_bench").tempdir()?;
    let config_file_path: PathBuf = temp_dir.path().join("lock_bench_config.toml");

    let config_content = format!(
        "[store]\n\
        data_dir = \"{}\"\n\
        file_name = \"lock_bench.meta\"\n\
        capacity = 8\n\
        \n\
        [lock]\n\
        timeout_ms = 5000\n",
        temp_dir.path().to_string_lossy().replace('\\', "\\\\"),
    );

    let mut file = File::create(&config_file_path)?;
    file.write_all(config_content.as_bytes())?;
    println!("Temporary benchmark config created at: {}", config_file_path.display());

    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    run_bench(&cargo, &config_file_path, &["-n", "20000"])?;
    run_bench(&cargo, &config_file_path, &["-n", "20000", "--queue-lock", "--destroy"])?;

    println!("\nlock_bench runs finished.");
    Ok(())
}
