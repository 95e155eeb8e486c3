//! Supervisor Process
//!
//! Runs the benchmark in `processes` worker processes, one after the other,
//! and merges the run of each worker into a single [`Benchmark`].
//!
//! A worker is the benchmark binary itself started with `--worker --stdout`.
//! It writes a JSON suite holding exactly one benchmark with one run to
//! stdout. When the loop count is 0, the first worker calibrates and its
//! loop count is passed explicitly to every following worker.

use perfrun_core::MeasureMode;
use perfrun_core::affinity::format_cpu_list;
use perfrun_ipc::{Benchmark, BenchmarkError, FormatError, decode_suite};
use std::ffi::OsString;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Environment variables always passed to workers
pub const DEFAULT_INHERITED_ENV: &[&str] = &["PATH", "HOME", "TEMP", "COMSPEC", "SystemRoot"];

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn worker {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed with {status}")]
    WorkerFailed {
        program: String,
        status: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error("invalid worker output: {0}")]
    Decode(#[from] FormatError),

    #[error("worker produced {0} benchmarks instead of 1")]
    BenchmarkCount(usize),

    #[error("worker produced {0} runs instead of 1")]
    RunCount(usize),

    #[error("Interrupted: exit")]
    Interrupted,

    #[error("worker {program} killed after {timeout:?}")]
    Timeout {
        program: String,
        timeout: Duration,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),

    #[error("worker {0} did not report its loop count")]
    MissingLoops(usize),

    /// The worker exited successfully but its stdout is not a single run
    #[error("{program}: {source}")]
    MalformedOutput {
        program: String,
        #[source]
        source: Box<SupervisorError>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

impl SupervisorError {
    /// Output captured from the failing worker, if any
    pub fn captured_output(&self) -> Option<(&[u8], &[u8])> {
        match self {
            SupervisorError::WorkerFailed { stdout, stderr, .. }
            | SupervisorError::Timeout { stdout, stderr, .. }
            | SupervisorError::MalformedOutput { stdout, stderr, .. } => {
                Some((stdout.as_slice(), stderr.as_slice()))
            }
            _ => None,
        }
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether SIGINT or SIGTERM was received since the handlers were installed.
pub fn interrupt_requested() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Flag set by the SIGINT/SIGTERM handlers
pub(crate) fn interrupt_flag() -> &'static AtomicBool {
    &INTERRUPTED
}

/// Install SIGINT/SIGTERM handlers that only set the interrupt flag.
///
/// Workers share the terminal's process group, so Ctrl+C reaches them
/// directly; the supervisor notices the flag once the current worker exits.
#[cfg(unix)]
pub fn install_interrupt_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = interrupt_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn interrupt_handler(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
pub fn install_interrupt_handler() {}

/// Parameters of one worker process
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRequest {
    /// 0-based spawn index
    pub index: usize,
    pub samples: u64,
    pub warmups: u64,
    /// 0 asks the worker to calibrate
    pub loops: u64,
    pub min_time: f64,
    pub verbose: bool,
    pub affinity: Option<Vec<usize>>,
    pub mode: MeasureMode,
}

impl WorkerRequest {
    /// Worker-mode command line arguments
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![
            "--worker".to_string(),
            "--stdout".to_string(),
            "--samples".to_string(),
            self.samples.to_string(),
            "--warmups".to_string(),
            self.warmups.to_string(),
            "--loops".to_string(),
            self.loops.to_string(),
            "--min-time".to_string(),
            self.min_time.to_string(),
        ];
        if self.verbose {
            args.push("-v".to_string());
        }
        if let Some(cpus) = self.affinity.as_deref().filter(|cpus| !cpus.is_empty()) {
            args.push(format!("--affinity={}", format_cpu_list(cpus)));
        }
        match self.mode {
            MeasureMode::Timing => {}
            MeasureMode::TrackMemory => args.push("--track-memory".to_string()),
            MeasureMode::TraceAllocations => args.push("--tracemalloc".to_string()),
        }
        args
    }
}

/// Runs one worker and returns the benchmark it produced.
pub trait WorkerSpawner {
    fn spawn_worker(&mut self, request: &WorkerRequest) -> Result<Benchmark, SupervisorError>;
}

/// Hook that may append arguments to a worker command line
pub type PrepareArgs = Box<dyn Fn(&WorkerRequest, &mut Vec<String>)>;

/// Spawns real worker processes.
pub struct ProcessSpawner {
    program_args: Vec<String>,
    inherit_environ: Vec<String>,
    timeout: Option<Duration>,
    prepare_args: Option<PrepareArgs>,
}

impl ProcessSpawner {
    /// `program_args[0]` is the executable, the rest are passed before the
    /// worker arguments.
    pub fn new(program_args: Vec<String>) -> Self {
        Self {
            program_args,
            inherit_environ: Vec::new(),
            timeout: None,
            prepare_args: None,
        }
    }

    /// Extra environment variables copied into the worker environment
    pub fn inherit_environ(mut self, names: Vec<String>) -> Self {
        self.inherit_environ = names;
        self
    }

    /// Kill workers running longer than `timeout`
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adjust every worker command line before spawning
    pub fn prepare_args(mut self, hook: Option<PrepareArgs>) -> Self {
        self.prepare_args = hook;
        self
    }

    /// Full command line for `request`
    pub fn command_line(&self, request: &WorkerRequest) -> Vec<String> {
        let mut cmd = self.program_args.clone();
        cmd.extend(request.worker_args());
        if let Some(hook) = &self.prepare_args {
            hook(request, &mut cmd);
        }
        cmd
    }

    /// Worker environment: only whitelisted variables of the parent
    pub fn environment(&self) -> Vec<(String, OsString)> {
        DEFAULT_INHERITED_ENV
            .iter()
            .copied()
            .chain(self.inherit_environ.iter().map(String::as_str))
            .filter_map(|name| std::env::var_os(name).map(|value| (name.to_string(), value)))
            .collect()
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn_worker(&mut self, request: &WorkerRequest) -> Result<Benchmark, SupervisorError> {
        let cmd = self.command_line(request);
        let Some((program, args)) = cmd.split_first() else {
            return Err(SupervisorError::SpawnFailed {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
            });
        };
        tracing::debug!(worker = request.index, command = ?cmd, "spawning worker");

        let child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(self.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed {
                program: program.clone(),
                source,
            })?;

        let output = WorkerHandle::new(program.clone(), child).wait(self.timeout)?;
        if !output.status.success() {
            return Err(SupervisorError::WorkerFailed {
                program: program.clone(),
                status: output.status.to_string(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        match parse_worker_output(&output.stdout) {
            Ok(benchmark) => {
                if !output.stderr.is_empty() {
                    tracing::debug!(
                        worker = request.index,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                        "worker diagnostics"
                    );
                }
                Ok(benchmark)
            }
            Err(e) => Err(SupervisorError::MalformedOutput {
                program: program.clone(),
                source: Box::new(e),
                stdout: output.stdout,
                stderr: output.stderr,
            }),
        }
    }
}

/// Decode the stdout of a worker: one benchmark holding one run.
pub fn parse_worker_output(stdout: &[u8]) -> Result<Benchmark, SupervisorError> {
    let mut benchmarks = decode_suite(stdout)?.into_benchmarks();
    if benchmarks.len() != 1 {
        return Err(SupervisorError::BenchmarkCount(benchmarks.len()));
    }
    let benchmark = benchmarks.remove(0);
    if benchmark.runs().len() != 1 {
        return Err(SupervisorError::RunCount(benchmark.runs().len()));
    }
    Ok(benchmark)
}

struct WorkerOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Running worker process with both output pipes drained concurrently
struct WorkerHandle {
    program: String,
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl WorkerHandle {
    fn new(program: String, mut child: Child) -> Self {
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        Self {
            program,
            child,
            stdout,
            stderr,
        }
    }

    fn wait(mut self, timeout: Option<Duration>) -> Result<WorkerOutput, SupervisorError> {
        let status = match timeout {
            None => self.child.wait(),
            Some(timeout) => match self.wait_deadline(Instant::now() + timeout) {
                Ok(Some(status)) => Ok(status),
                Ok(None) => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    let (stdout, stderr) = self.collect();
                    return Err(SupervisorError::Timeout {
                        program: self.program.clone(),
                        timeout,
                        stdout,
                        stderr,
                    });
                }
                Err(e) => Err(e),
            },
        };
        let status = status.map_err(|source| SupervisorError::SpawnFailed {
            program: self.program.clone(),
            source,
        })?;
        let (stdout, stderr) = self.collect();
        Ok(WorkerOutput {
            status,
            stdout,
            stderr,
        })
    }

    /// Poll until the child exits or the deadline passes.
    fn wait_deadline(&mut self, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn collect(&mut self) -> (Vec<u8>, Vec<u8>) {
        let join = |handle: Option<JoinHandle<Vec<u8>>>| {
            handle.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        (join(self.stdout.take()), join(self.stderr.take()))
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Settings shared by every worker of a benchmark
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub name: String,
    pub processes: u64,
    pub samples: u64,
    pub warmups: u64,
    pub loops: u64,
    pub min_time: f64,
    pub verbose: bool,
    pub affinity: Option<Vec<usize>>,
    pub mode: MeasureMode,
}

/// Progress notifications from the supervisor
pub trait SupervisorObserver {
    /// A worker finished and its run was added to `benchmark`
    fn worker_done(&mut self, _index: usize, _total: u64, _benchmark: &Benchmark) {}

    /// The first worker calibrated the loop count
    fn calibrated(&mut self, _loops: u64) {}
}

impl SupervisorObserver for () {}

/// Spawns workers sequentially and merges their runs
pub struct Supervisor<S> {
    config: SupervisorConfig,
    spawner: S,
    interrupted: &'static AtomicBool,
}

impl<S: WorkerSpawner> Supervisor<S> {
    /// Create a new supervisor
    pub fn new(config: SupervisorConfig, spawner: S) -> Self {
        Self {
            config,
            spawner,
            interrupted: interrupt_flag(),
        }
    }

    /// Check `flag` around every spawn instead of the signal handler's flag
    pub fn with_interrupt_flag(mut self, flag: &'static AtomicBool) -> Self {
        self.interrupted = flag;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Loop count workers are currently given (0 before calibration)
    pub fn loops(&self) -> u64 {
        self.config.loops
    }

    /// Run all workers and return the merged benchmark.
    ///
    /// Stops at the first failing worker; nothing is returned on error.
    pub fn run(&mut self, observer: &mut dyn SupervisorObserver) -> Result<Benchmark, SupervisorError> {
        let mut benchmark = Benchmark::new(self.config.name.clone())?;
        let total = self.config.processes;

        for index in 0..total as usize {
            if self.interrupted.load(Ordering::Relaxed) {
                return Err(SupervisorError::Interrupted);
            }
            let request = self.request(index);
            let result = self.spawner.spawn_worker(&request);
            if self.interrupted.load(Ordering::Relaxed) {
                return Err(SupervisorError::Interrupted);
            }
            let worker_bench = result?;

            let loops = worker_bench.runs().first().and_then(|run| run.loops());
            benchmark.add_runs(worker_bench)?;
            observer.worker_done(index, total, &benchmark);

            if self.config.loops == 0 {
                let loops = loops.filter(|&l| l > 0).ok_or(SupervisorError::MissingLoops(index))?;
                tracing::info!(loops, "calibrated by the first worker");
                self.config.loops = loops;
                observer.calibrated(loops);
            }
        }

        Ok(benchmark)
    }

    fn request(&self, index: usize) -> WorkerRequest {
        WorkerRequest {
            index,
            samples: self.config.samples,
            warmups: self.config.warmups,
            loops: self.config.loops,
            min_time: self.config.min_time,
            verbose: self.config.verbose,
            affinity: self.config.affinity.clone(),
            mode: self.config.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfrun_ipc::{BenchmarkSuite, Metadata, Run, encode_suite};

    fn worker_bench(name: &str, loops: u64, samples: usize, base: f64) -> Benchmark {
        let mut metadata = Metadata::new();
        metadata.insert("name", name);
        metadata.insert("loops", loops);
        let values = (0..samples).map(|i| base + i as f64).collect();
        let run = Run::new(values, Vec::new(), metadata).unwrap();
        let mut bench = Benchmark::new(name).unwrap();
        bench.add_run(run).unwrap();
        bench
    }

    /// Records requests; the first worker "calibrates" to `calibrated`.
    struct MockSpawner {
        calibrated: u64,
        samples: usize,
        requests: Vec<WorkerRequest>,
        fail_at: Option<usize>,
    }

    impl MockSpawner {
        fn new(calibrated: u64, samples: usize) -> Self {
            Self {
                calibrated,
                samples,
                requests: Vec::new(),
                fail_at: None,
            }
        }
    }

    impl WorkerSpawner for &mut MockSpawner {
        fn spawn_worker(&mut self, request: &WorkerRequest) -> Result<Benchmark, SupervisorError> {
            self.requests.push(request.clone());
            if self.fail_at == Some(request.index) {
                return Err(SupervisorError::WorkerFailed {
                    program: "bench".into(),
                    status: "exit status: 1".into(),
                    stdout: b"partial".to_vec(),
                    stderr: b"boom".to_vec(),
                });
            }
            let loops = if request.loops == 0 { self.calibrated } else { request.loops };
            Ok(worker_bench("bench", loops, self.samples, request.index as f64 * 10.0))
        }
    }

    fn config(processes: u64, loops: u64) -> SupervisorConfig {
        SupervisorConfig {
            name: "bench".into(),
            processes,
            samples: 3,
            warmups: 1,
            loops,
            min_time: 0.1,
            verbose: false,
            affinity: None,
            mode: MeasureMode::Timing,
        }
    }

    #[derive(Default)]
    struct Recorder {
        done: Vec<usize>,
        calibrated: Vec<u64>,
    }

    impl SupervisorObserver for Recorder {
        fn worker_done(&mut self, index: usize, _total: u64, _benchmark: &Benchmark) {
            self.done.push(index);
        }

        fn calibrated(&mut self, loops: u64) {
            self.calibrated.push(loops);
        }
    }

    #[test]
    fn test_first_worker_calibrates_for_the_rest() {
        let mut spawner = MockSpawner::new(64, 3);
        let mut supervisor = Supervisor::new(config(3, 0), &mut spawner);
        let mut recorder = Recorder::default();
        let bench = supervisor.run(&mut recorder).unwrap();

        assert_eq!(supervisor.loops(), 64);
        let loops: Vec<u64> = spawner.requests.iter().map(|r| r.loops).collect();
        assert_eq!(loops, vec![0, 64, 64]);
        assert_eq!(recorder.calibrated, vec![64]);
        assert_eq!(recorder.done, vec![0, 1, 2]);
        assert!(bench.runs().iter().all(|run| run.loops() == Some(64)));
    }

    #[test]
    fn test_fixed_loops_never_calibrate() {
        let mut spawner = MockSpawner::new(64, 2);
        let mut supervisor = Supervisor::new(config(2, 1000), &mut spawner);
        supervisor.run(&mut ()).unwrap();
        assert!(spawner.requests.iter().all(|r| r.loops == 1000));
    }

    #[test]
    fn test_merge_keeps_spawn_order() {
        let mut spawner = MockSpawner::new(8, 5);
        let mut supervisor = Supervisor::new(config(4, 0), &mut spawner);
        let bench = supervisor.run(&mut ()).unwrap();

        assert_eq!(bench.runs().len(), 4);
        assert_eq!(bench.total_values(), 20);
        let firsts: Vec<f64> = bench.runs().iter().map(|run| run.values()[0]).collect();
        assert_eq!(firsts, vec![0.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_worker_failure_aborts() {
        let mut spawner = MockSpawner::new(8, 3);
        spawner.fail_at = Some(1);
        let mut supervisor = Supervisor::new(config(5, 0), &mut spawner);
        let err = supervisor.run(&mut ()).unwrap_err();

        assert_eq!(spawner.requests.len(), 2);
        let (stdout, stderr) = err.captured_output().unwrap();
        assert_eq!(stdout, b"partial");
        assert_eq!(stderr, b"boom");
    }

    #[test]
    fn test_worker_args() {
        let request = WorkerRequest {
            index: 0,
            samples: 3,
            warmups: 1,
            loops: 0,
            min_time: 0.1,
            verbose: true,
            affinity: Some(vec![2, 3]),
            mode: MeasureMode::TrackMemory,
        };
        assert_eq!(
            request.worker_args(),
            vec![
                "--worker", "--stdout", "--samples", "3", "--warmups", "1", "--loops", "0",
                "--min-time", "0.1", "-v", "--affinity=2-3", "--track-memory",
            ]
        );
    }

    #[test]
    fn test_command_line_with_hook() {
        let hook: PrepareArgs = Box::new(|request, cmd| {
            cmd.push(format!("--index={}", request.index));
        });
        let spawner = ProcessSpawner::new(vec!["/bin/bench".into(), "--name".into(), "x".into()])
            .prepare_args(Some(hook));
        let request = WorkerRequest {
            index: 4,
            samples: 1,
            warmups: 0,
            loops: 1,
            min_time: 1e-9,
            verbose: false,
            affinity: None,
            mode: MeasureMode::Timing,
        };
        let cmd = spawner.command_line(&request);
        assert_eq!(&cmd[..3], &["/bin/bench", "--name", "x"]);
        assert_eq!(cmd[3], "--worker");
        assert_eq!(cmd.last().map(String::as_str), Some("--index=4"));
        let min_time: f64 = cmd[cmd.iter().position(|a| a == "--min-time").unwrap() + 1]
            .parse()
            .unwrap();
        assert_eq!(min_time, 1e-9);
    }

    #[test]
    fn test_environment_is_whitelisted() {
        let spawner = ProcessSpawner::new(vec!["bench".into()]);
        let names: Vec<String> = spawner.environment().into_iter().map(|(k, _)| k).collect();
        assert!(names.iter().all(|name| DEFAULT_INHERITED_ENV.contains(&name.as_str())));
    }

    #[test]
    fn test_parse_worker_output() {
        let suite = BenchmarkSuite::single(worker_bench("bench", 4, 3, 1.0));
        let bench = parse_worker_output(encode_suite(&suite).unwrap().as_bytes()).unwrap();
        assert_eq!(bench.runs().len(), 1);

        let mut two = BenchmarkSuite::new();
        two.add_benchmark(worker_bench("a", 1, 1, 1.0)).unwrap();
        two.add_benchmark(worker_bench("b", 1, 1, 1.0)).unwrap();
        let err = parse_worker_output(encode_suite(&two).unwrap().as_bytes()).unwrap_err();
        assert!(matches!(err, SupervisorError::BenchmarkCount(2)));

        assert!(matches!(
            parse_worker_output(b"not json"),
            Err(SupervisorError::Decode(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_spawner_reports_failure() {
        let mut spawner = ProcessSpawner::new(vec![
            "/bin/sh".into(),
            "-c".into(),
            "echo oops >&2; exit 3".into(),
            "sh".into(),
        ]);
        let request = WorkerRequest {
            index: 0,
            samples: 1,
            warmups: 0,
            loops: 1,
            min_time: 0.1,
            verbose: false,
            affinity: None,
            mode: MeasureMode::Timing,
        };
        match spawner.spawn_worker(&request) {
            Err(SupervisorError::WorkerFailed { stderr, status, .. }) => {
                assert_eq!(stderr, b"oops\n");
                assert!(status.contains('3'));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_process_spawner_keeps_malformed_output() {
        let mut spawner = ProcessSpawner::new(vec![
            "/bin/sh".into(),
            "-c".into(),
            "echo 'not json'; echo 'panicked at src/main.rs' >&2".into(),
            "sh".into(),
        ]);
        let request = WorkerRequest {
            index: 0,
            samples: 1,
            warmups: 0,
            loops: 1,
            min_time: 0.1,
            verbose: false,
            affinity: None,
            mode: MeasureMode::Timing,
        };
        let err = spawner.spawn_worker(&request).unwrap_err();
        match &err {
            SupervisorError::MalformedOutput { source, .. } => {
                assert!(matches!(**source, SupervisorError::Decode(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        let (stdout, stderr) = err.captured_output().unwrap();
        assert_eq!(stdout, b"not json\n");
        assert_eq!(stderr, b"panicked at src/main.rs\n");
    }

    #[test]
    fn test_interrupt_stops_after_current_worker() {
        static FLAG: AtomicBool = AtomicBool::new(false);

        /// Delivers the interrupt while the first worker is running
        struct InterruptingSpawner(MockSpawner);

        impl WorkerSpawner for &mut InterruptingSpawner {
            fn spawn_worker(&mut self, request: &WorkerRequest) -> Result<Benchmark, SupervisorError> {
                FLAG.store(true, Ordering::Relaxed);
                (&mut self.0).spawn_worker(request)
            }
        }

        let mut spawner = InterruptingSpawner(MockSpawner::new(8, 3));
        let mut recorder = Recorder::default();
        let err = Supervisor::new(config(5, 0), &mut spawner)
            .with_interrupt_flag(&FLAG)
            .run(&mut recorder)
            .unwrap_err();

        assert!(matches!(err, SupervisorError::Interrupted));
        assert_eq!(spawner.0.requests.len(), 1);
        assert!(recorder.done.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_spawner_timeout() {
        let mut spawner =
            ProcessSpawner::new(vec!["/bin/sh".into(), "-c".into(), "exec sleep 5".into(), "sh".into()])
                .timeout(Some(Duration::from_millis(100)));
        let request = WorkerRequest {
            index: 0,
            samples: 1,
            warmups: 0,
            loops: 1,
            min_time: 0.1,
            verbose: false,
            affinity: None,
            mode: MeasureMode::Timing,
        };
        let started = Instant::now();
        let err = spawner.spawn_worker(&request).unwrap_err();
        assert!(matches!(err, SupervisorError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
