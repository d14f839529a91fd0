//! Engine management - command construction, process supervision, report tool

mod process;
mod report;
mod supervisor;

pub use process::{EngineProcess, ProcessGroup};
pub use report::{archive_dir, ReportTool};
pub use supervisor::Supervisor;

use crate::config::EngineConfig;
use crate::session::{Distribution, LoadSplit, RunMode};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// One engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    /// Engine executable
    pub program: PathBuf,

    /// Test plan to run
    pub plan: PathBuf,

    /// Results file the engine writes
    pub results_file: PathBuf,

    /// Working directory (defaults to the current dir)
    pub working_dir: Option<PathBuf>,

    /// Remote workers driven by this controller
    pub remote_hosts: Vec<String>,

    /// Properties sent to every remote worker (`-G`)
    pub global_props: BTreeMap<String, String>,

    /// Progress report interval
    pub summariser_interval_secs: u64,
}

impl EngineCommand {
    pub fn new(
        program: impl Into<PathBuf>,
        plan: impl Into<PathBuf>,
        results_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            plan: plan.into(),
            results_file: results_file.into(),
            working_dir: None,
            remote_hosts: Vec::new(),
            global_props: BTreeMap::new(),
            summariser_interval_secs: 1,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_remote_hosts(mut self, hosts: impl IntoIterator<Item = String>) -> Self {
        self.remote_hosts = hosts.into_iter().collect();
        self
    }

    pub fn with_global_prop(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.global_props.insert(key.into(), value.to_string());
        self
    }

    pub fn with_summariser_interval(mut self, secs: u64) -> Self {
        self.summariser_interval_secs = secs.max(1);
        self
    }

    /// Command-line arguments, program excluded
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-n".to_string(),
            "-t".to_string(),
            self.plan.display().to_string(),
            "-l".to_string(),
            self.results_file.display().to_string(),
            "-Jjmeter.save.saveservice.output_format=csv".to_string(),
            "-Jjmeter.save.saveservice.autoflush=true".to_string(),
            "-Jsummariser.name=summary".to_string(),
            format!("-Jsummariser.interval={}", self.summariser_interval_secs),
        ];

        if !self.remote_hosts.is_empty() {
            args.push("-R".to_string());
            args.push(self.remote_hosts.join(","));
        }

        for (key, value) in &self.global_props {
            args.push(format!("-G{}={}", key, value));
        }

        args
    }

    /// Process builder with piped output; the child dies with its handle.
    ///
    /// On unix the engine leads a process group of its own so that stop and
    /// kill can reach everything it forks.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Translate a run mode into concrete engine invocations.
///
/// Split-equal runs get one controller per host so that each worker can be
/// handed its own share.
pub fn invocations(
    mode: &RunMode,
    plan: &Path,
    work_dir: &Path,
    config: &EngineConfig,
) -> Vec<EngineCommand> {
    let results_dir = work_dir.join("results");
    let base = |results_file: PathBuf| {
        EngineCommand::new(&config.jmeter_bin, plan, results_file)
            .with_working_dir(work_dir)
            .with_summariser_interval(config.summariser_interval_secs)
    };

    match mode {
        RunMode::Sanity => vec![base(results_dir.join("result.jtl"))],
        RunMode::Distributed(dist) => match dist.strategy() {
            Distribution::Replicate => vec![base(results_dir.join("result-combined.jtl"))
                .with_remote_hosts(dist.hosts().iter().cloned())],
            Distribution::SplitEqual(split) => dist
                .hosts()
                .iter()
                .zip(split.shares())
                .map(|(host, share)| {
                    let cmd = base(results_dir.join(host_results_name(host)))
                        .with_remote_hosts([host.clone()]);
                    match split {
                        LoadSplit::Tps { .. } => cmd.with_global_prop("tps", share),
                        LoadSplit::Threads {
                            ramp_up_secs,
                            duration_secs,
                            ..
                        } => {
                            let cmd = cmd
                                .with_global_prop("threads", share)
                                .with_global_prop("rampup", ramp_up_secs);
                            match duration_secs {
                                Some(d) => cmd.with_global_prop("duration", d),
                                None => cmd,
                            }
                        }
                    }
                })
                .collect(),
        },
    }
}

fn host_results_name(host: &str) -> String {
    let safe: String = host
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("result-{}.jtl", safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DistConfig, SplitBasis};

    fn config() -> EngineConfig {
        EngineConfig {
            jmeter_bin: PathBuf::from("/opt/jmeter/bin/jmeter"),
            jmeter_home: None,
            grace_period_secs: 5,
            summariser_interval_secs: 2,
            output_tail_lines: 20,
        }
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sanity_invocation() {
        let cmds = invocations(
            &RunMode::Sanity,
            Path::new("/s/plan.jmx"),
            Path::new("/s"),
            &config(),
        );
        assert_eq!(cmds.len(), 1);
        assert_eq!(
            cmds[0].args(),
            vec![
                "-n",
                "-t",
                "/s/plan.jmx",
                "-l",
                "/s/results/result.jtl",
                "-Jjmeter.save.saveservice.output_format=csv",
                "-Jjmeter.save.saveservice.autoflush=true",
                "-Jsummariser.name=summary",
                "-Jsummariser.interval=2",
            ]
        );
        assert_eq!(cmds[0].working_dir.as_deref(), Some(Path::new("/s")));
    }

    #[test]
    fn test_replicate_uses_one_controller() {
        let mode = RunMode::Distributed(DistConfig::replicate(hosts(&["w1", "w2:1099"])).unwrap());
        let cmds = invocations(&mode, Path::new("/s/plan.jmx"), Path::new("/s"), &config());

        assert_eq!(cmds.len(), 1);
        let args = cmds[0].args();
        assert!(args.windows(2).any(|w| w == ["-R", "w1,w2:1099"]));
        assert!(cmds[0].global_props.is_empty());
        assert_eq!(
            cmds[0].results_file,
            PathBuf::from("/s/results/result-combined.jtl")
        );
    }

    #[test]
    fn test_split_tps_gives_each_host_its_share() {
        let mode = RunMode::Distributed(
            DistConfig::split_equal(hosts(&["w1", "w2", "w3"]), SplitBasis::Tps, 10).unwrap(),
        );
        let cmds = invocations(&mode, Path::new("/s/plan.jmx"), Path::new("/s"), &config());

        assert_eq!(cmds.len(), 3);
        let tps: Vec<&str> = cmds
            .iter()
            .map(|c| c.global_props.get("tps").unwrap().as_str())
            .collect();
        assert_eq!(tps, vec!["4", "3", "3"]);
        assert_eq!(cmds[1].remote_hosts, vec!["w2".to_string()]);
        assert!(cmds[2].args().contains(&"-Gtps=3".to_string()));
    }

    #[test]
    fn test_split_threads_passes_timing_through() {
        let basis = SplitBasis::Threads {
            ramp_up_secs: 60,
            duration_secs: Some(300),
        };
        let mode = RunMode::Distributed(
            DistConfig::split_equal(hosts(&["10.0.0.1:1099", "10.0.0.2:1099"]), basis, 25)
                .unwrap(),
        );
        let cmds = invocations(&mode, Path::new("/s/plan.jmx"), Path::new("/s"), &config());

        assert_eq!(cmds[0].global_props.get("threads").map(String::as_str), Some("13"));
        assert_eq!(cmds[1].global_props.get("threads").map(String::as_str), Some("12"));
        for cmd in &cmds {
            assert_eq!(cmd.global_props.get("rampup").map(String::as_str), Some("60"));
            assert_eq!(cmd.global_props.get("duration").map(String::as_str), Some("300"));
        }
        assert_eq!(
            cmds[0].results_file,
            PathBuf::from("/s/results/result-10.0.0.1_1099.jtl")
        );
    }

    #[test]
    fn test_threads_without_duration() {
        let basis = SplitBasis::Threads {
            ramp_up_secs: 10,
            duration_secs: None,
        };
        let mode =
            RunMode::Distributed(DistConfig::split_equal(hosts(&["a"]), basis, 4).unwrap());
        let cmds = invocations(&mode, Path::new("/s/plan.jmx"), Path::new("/s"), &config());
        assert!(!cmds[0].global_props.contains_key("duration"));
    }
}
