use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::TraciError;

/// How to start a simulator process serving TraCI.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    /// Simulator binary, `sumo` unless overridden.
    pub program: PathBuf,
    pub port: u16,
    pub seed: u64,
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("sumo"),
            port: 8813,
            seed: 13,
            extra_args: Vec::new(),
        }
    }
}

impl LaunchOptions {
    /// Arguments passed to the simulator binary.
    pub fn args(&self, config: &Path, begin_time: f64) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            config.display().to_string(),
            "--begin".to_string(),
            format!("{begin_time}"),
            "--remote-port".to_string(),
            self.port.to_string(),
            "--seed".to_string(),
            self.seed.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Running simulator process. Killed when dropped.
#[derive(Debug)]
pub struct SimulatorProcess {
    child: Child,
}

impl SimulatorProcess {
    pub fn spawn(
        options: &LaunchOptions,
        config: &Path,
        begin_time: f64,
    ) -> Result<Self, TraciError> {
        let args = options.args(config, begin_time);
        info!(
            program = %options.program.display(),
            port = options.port,
            begin_time,
            "launching simulator"
        );
        debug!(?args, "simulator arguments");
        let child = Command::new(&options.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| TraciError::Launch {
                program: options.program.display().to_string(),
                source,
            })?;
        Ok(Self { child })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Wait for a process that was asked to quit through the protocol.
    pub fn wait(mut self) -> Result<(), TraciError> {
        let status = self.child.wait()?;
        if !status.success() {
            warn!(%status, "simulator exited with failure status");
        }
        Ok(())
    }
}

impl Drop for SimulatorProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_follow_the_simulator_cli() {
        let options = LaunchOptions {
            port: 9000,
            extra_args: vec!["--no-step-log".into()],
            ..LaunchOptions::default()
        };
        let args = options.args(Path::new("simulation_w2e_out_2020-01-02.sumo.cfg"), 900.0);
        assert_eq!(
            args,
            vec![
                "-c",
                "simulation_w2e_out_2020-01-02.sumo.cfg",
                "--begin",
                "900",
                "--remote-port",
                "9000",
                "--seed",
                "13",
                "--no-step-log",
            ]
        );
    }

    #[test]
    fn missing_binary_is_a_launch_error() {
        let options = LaunchOptions {
            program: PathBuf::from("/nonexistent/sumo-binary"),
            ..LaunchOptions::default()
        };
        let err = SimulatorProcess::spawn(&options, Path::new("x.sumo.cfg"), 0.0).unwrap_err();
        assert!(matches!(err, TraciError::Launch { .. }));
    }
}
