//! Choosing where a command runs: a named node, the node of a running job,
//! or a fresh Slurm allocation.

use crate::error::SessionError;
use crate::exec::{shell_join, ExecOutput, ProcessHandle, RemoteEndpoint};
use crate::extract::{ExtractionSpec, PendingExtraction};
use std::time::{SystemTime, UNIX_EPOCH};

/// Field harvested from `salloc` output.
pub const FIELD_JOBID: &str = "jobid";
pub const FIELD_NODE_NAME: &str = "node_name";

/// Seconds between `squeue` checks while following a batch job.
const BATCH_POLL_SECS: u32 = 5;
const SALLOC_JOBID_PATTERN: &str = "salloc: Granted job allocation ([0-9]+)";
const SALLOC_NODE_PATTERN: &str = "salloc: Nodes ([^ ]+) are ready for job";
const SLEEPER_COMMAND: &str = "echo @@@ $(hostname) @@@ && sleep 1000d";
const SLEEPER_NODE_PATTERN: &str = "@@@ ([^ ]+) @@@";

/// Which compute target the user asked for. At most one option may be given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AllocationRequest {
    /// Fresh allocation with scheduler defaults.
    #[default]
    Default,
    Node(String),
    Job(String),
    /// Fresh allocation with extra scheduler flags.
    ExtraArgs(Vec<String>),
}

impl AllocationRequest {
    /// Build a request from the raw `--node` / `--job` / `--alloc` options.
    pub fn from_options(
        node: Option<String>,
        job: Option<String>,
        alloc: Vec<String>,
    ) -> Result<Self, SessionError> {
        let given = usize::from(node.is_some())
            + usize::from(job.is_some())
            + usize::from(!alloc.is_empty());
        if given > 1 {
            return Err(SessionError::Configuration(
                "--node, --job and --alloc are mutually exclusive options".to_string(),
            ));
        }
        Ok(match (node, job) {
            (Some(node), _) => Self::Node(node),
            (_, Some(job)) => Self::Job(job),
            _ if !alloc.is_empty() => Self::ExtraArgs(alloc),
            _ => Self::Default,
        })
    }

    /// Whether this request asks the scheduler for a new allocation.
    pub fn is_fresh_allocation(&self) -> bool {
        matches!(self, Self::Default | Self::ExtraArgs(_))
    }
}

/// Turns an [`AllocationRequest`] into something commands can run on.
#[derive(Debug, Clone)]
pub struct AllocationResolver {
    node_host_suffix: String,
    remote_root: String,
}

impl AllocationResolver {
    pub fn new(node_host_suffix: impl Into<String>, remote_root: impl Into<String>) -> Self {
        Self {
            node_host_suffix: node_host_suffix.into(),
            remote_root: remote_root.into(),
        }
    }

    /// ssh-addressable host for a bare node name.
    pub fn node_host(&self, node_name: &str) -> String {
        format!("{node_name}{}", self.node_host_suffix)
    }

    pub async fn resolve(
        &self,
        base: &RemoteEndpoint,
        request: &AllocationRequest,
    ) -> Result<ResolvedEndpoint, SessionError> {
        match request {
            AllocationRequest::Node(node) => {
                tracing::debug!(%node, "using named node");
                Ok(ResolvedEndpoint::Node {
                    node_name: node.clone(),
                    endpoint: base.at_host(self.node_host(node)),
                })
            }
            AllocationRequest::Job(job) => {
                let node = self.lookup_job_node(base, job).await?;
                tracing::info!(%job, %node, "job located");
                Ok(ResolvedEndpoint::Node {
                    endpoint: base.at_host(self.node_host(&node)),
                    node_name: node,
                })
            }
            AllocationRequest::Default => Ok(ResolvedEndpoint::Slurm(SlurmEndpoint::new(
                base.clone(),
                Vec::new(),
                self.remote_root.clone(),
            ))),
            AllocationRequest::ExtraArgs(args) => Ok(ResolvedEndpoint::Slurm(SlurmEndpoint::new(
                base.clone(),
                args.clone(),
                self.remote_root.clone(),
            ))),
        }
    }

    async fn lookup_job_node(
        &self,
        base: &RemoteEndpoint,
        job: &str,
    ) -> Result<String, SessionError> {
        let command = shell_join(&["squeue", "--jobs", job, "-ho", "%N"]);
        let output = base.get_output(&command).await.map_err(|e| match e {
            SessionError::RemoteExecution { output, .. } => {
                SessionError::AllocationLookup(format!("squeue failed for job {job}: {output}"))
            }
            other => other,
        })?;
        match output.split_whitespace().next() {
            Some(node) => Ok(node.to_string()),
            None => Err(SessionError::AllocationLookup(format!(
                "job {job} is not running on any node"
            ))),
        }
    }
}

/// A granted allocation held open by a local process.
#[derive(Debug)]
pub struct Allocation {
    pub node_name: String,
    pub jobid: Option<String>,
    pub process: ProcessHandle,
}

/// Runs commands inside Slurm allocations requested from the login node.
///
/// Non-persisted commands go through `srun`, which blocks until granted and
/// releases the allocation when it exits. Persisted commands are submitted
/// with `sbatch` and their output file is followed, so the job survives the
/// local process.
#[derive(Debug, Clone)]
pub struct SlurmEndpoint {
    login: RemoteEndpoint,
    /// Login host carrying the command context (profile, precommand).
    context: RemoteEndpoint,
    alloc_args: Vec<String>,
    remote_root: String,
    persisted: bool,
}

impl SlurmEndpoint {
    pub fn new(login: RemoteEndpoint, alloc_args: Vec<String>, remote_root: String) -> Self {
        let login = login.at_host(login.host().to_string());
        Self {
            context: login.clone(),
            login,
            alloc_args,
            remote_root,
            persisted: false,
        }
    }

    /// Same allocation request, but the job outlives this process.
    pub fn persist(&self) -> Self {
        let mut next = self.clone();
        next.persisted = true;
        next
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn alloc_args(&self) -> &[String] {
        &self.alloc_args
    }

    pub fn with_profile(&self, profile: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.context = self.context.with_profile(profile);
        next
    }

    pub fn with_precommand(&self, precommand: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.context = self.context.with_precommand(precommand);
        next
    }

    /// `srun <args…> bash -c <command-in-context>`
    pub fn srun_command(&self, command: &str) -> String {
        let mut words = vec!["srun".to_string()];
        words.extend(self.alloc_args.iter().cloned());
        words.push("bash".to_string());
        words.push("-c".to_string());
        words.push(self.context.wrap(command));
        shell_join(&words)
    }

    /// Run a short command to completion in a transient allocation.
    pub async fn run(&self, command: &str) -> Result<ExecOutput, SessionError> {
        self.login.run(&self.srun_command(command)).await
    }

    /// Start `command` and harvest `patterns`. Persisted launches report the
    /// batch job id as soon as `sbatch` accepts the job.
    pub async fn extract(
        &self,
        command: &str,
        patterns: ExtractionSpec,
    ) -> Result<Launched, SessionError> {
        if self.persisted {
            let job = self.submit_batch(command).await?;
            let (process, pending) = self.login.extract(&job.follow, patterns).await?;
            Ok(Launched {
                process,
                pending,
                jobid: Some(job.jobid),
            })
        } else {
            let (process, pending) = self
                .login
                .extract(&self.srun_command(command), patterns)
                .await?;
            Ok(Launched {
                process,
                pending,
                jobid: None,
            })
        }
    }

    /// Obtain an allocation and block until the scheduler grants it.
    pub async fn ensure_allocation(&self) -> Result<Allocation, SessionError> {
        let (mut process, pending, submitted) = if self.persisted {
            let patterns = ExtractionSpec::new().field(FIELD_NODE_NAME, SLEEPER_NODE_PATTERN)?;
            let launched = self.extract(SLEEPER_COMMAND, patterns).await?;
            (launched.process, launched.pending, launched.jobid)
        } else {
            let patterns = ExtractionSpec::new()
                .field(FIELD_JOBID, SALLOC_JOBID_PATTERN)?
                .field(FIELD_NODE_NAME, SALLOC_NODE_PATTERN)?;
            let mut words = vec!["salloc".to_string()];
            words.extend(self.alloc_args.iter().cloned());
            // Some login shells are misconfigured for salloc.
            let (process, pending) = self
                .login
                .with_shell_wrapper()
                .extract(&shell_join(&words), patterns)
                .await?;
            (process, pending, None)
        };

        let result = match pending.wait().await {
            Ok(result) => result,
            Err(e) => {
                process.terminate().await;
                return Err(match e {
                    SessionError::OutputExtraction { missing } => SessionError::AllocationGrant(
                        format!("scheduler never reported {}", missing.join(", ")),
                    ),
                    other => other,
                });
            }
        };
        let node_name = result.require(FIELD_NODE_NAME)?.to_string();
        let jobid = submitted.or_else(|| result.get(FIELD_JOBID).map(str::to_string));
        tracing::info!(node = %node_name, jobid = ?jobid, persisted = self.persisted, "allocation granted");
        Ok(Allocation {
            node_name,
            jobid,
            process,
        })
    }

    /// Write `command` to a batch script, submit it, and return the job id
    /// plus the login-node command that follows the job's output.
    async fn submit_batch(&self, command: &str) -> Result<BatchJob, SessionError> {
        let tag = batch_tag();
        let root = self.remote_root.trim_end_matches('/');
        let script = format!("{root}/batch/batch-{tag}.sh");
        let output = format!("{root}/batch/out-{tag}.txt");
        let body = format!(
            "#!/bin/bash\n#SBATCH --output={output}\n#SBATCH --ntasks=1\n\n{}\n",
            self.context.wrap(command)
        );
        self.login.put_text(&body, &script).await?;
        tracing::debug!(%script, "wrote batch script");

        let mut sbatch = vec!["sbatch".to_string(), "--parsable".to_string()];
        sbatch.extend(self.alloc_args.iter().cloned());
        sbatch.push(script);
        let submitted = self.login.run(&shell_join(&sbatch)).await.map_err(|e| match e {
            SessionError::RemoteExecution { output, .. } => {
                SessionError::AllocationGrant(format!("sbatch rejected the job: {output}"))
            }
            other => other,
        })?;
        let jobid = parse_parsable_jobid(&submitted.stdout).ok_or_else(|| {
            SessionError::AllocationGrant(format!(
                "sbatch reported no job id: `{}`",
                submitted.stdout.trim()
            ))
        })?;
        tracing::info!(%jobid, "batch job submitted");
        Ok(BatchJob {
            follow: follow_command(&jobid, &output),
            jobid,
        })
    }
}

/// A command started on a compute target whose output is being harvested.
#[derive(Debug)]
pub struct Launched {
    pub process: ProcessHandle,
    pub pending: PendingExtraction,
    /// Batch job running the command, known before any output arrives.
    pub jobid: Option<String>,
}

#[derive(Debug)]
struct BatchJob {
    jobid: String,
    follow: String,
}

/// `sbatch --parsable` prints `<jobid>[;<cluster>]`.
fn parse_parsable_jobid(stdout: &str) -> Option<String> {
    let jobid = stdout.trim().split(';').next()?.trim();
    if !jobid.is_empty() && jobid.chars().all(|c| c.is_ascii_digit()) {
        Some(jobid.to_string())
    } else {
        None
    }
}

/// Tail `output` until job `jobid` leaves the queue, so the stream ends with
/// the job.
fn follow_command(jobid: &str, output: &str) -> String {
    format!(
        "touch {output} && {{ while squeue -h -j {jobid} 2>/dev/null | grep -q .; \
         do sleep {BATCH_POLL_SECS}; done & }} && tail -n +1 -f --pid=$! {output}"
    )
}

fn batch_tag() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Where a flow's commands run.
#[derive(Debug, Clone)]
pub enum ResolvedEndpoint {
    /// A known node, addressed directly.
    Node {
        node_name: String,
        endpoint: RemoteEndpoint,
    },
    /// A lazily requested scheduler allocation.
    Slurm(SlurmEndpoint),
}

impl ResolvedEndpoint {
    /// Mark the allocation as outliving this process. Only fresh allocations
    /// can persist.
    pub fn persist(&self) -> Result<Self, SessionError> {
        match self {
            Self::Slurm(slurm) => Ok(Self::Slurm(slurm.persist())),
            Self::Node { .. } => Err(SessionError::Configuration(
                "--persist requires a fresh allocation (not --node or --job)".to_string(),
            )),
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Slurm(slurm) if slurm.is_persisted())
    }

    /// Node name, when already known without asking the scheduler.
    pub fn known_node(&self) -> Option<&str> {
        match self {
            Self::Node { node_name, .. } => Some(node_name),
            Self::Slurm(_) => None,
        }
    }

    pub fn with_profile(&self, profile: impl Into<String>) -> Self {
        match self {
            Self::Node {
                node_name,
                endpoint,
            } => Self::Node {
                node_name: node_name.clone(),
                endpoint: endpoint.with_profile(profile),
            },
            Self::Slurm(slurm) => Self::Slurm(slurm.with_profile(profile)),
        }
    }

    pub fn with_precommand(&self, precommand: impl Into<String>) -> Self {
        match self {
            Self::Node {
                node_name,
                endpoint,
            } => Self::Node {
                node_name: node_name.clone(),
                endpoint: endpoint.with_precommand(precommand),
            },
            Self::Slurm(slurm) => Self::Slurm(slurm.with_precommand(precommand)),
        }
    }

    pub async fn run(&self, command: &str) -> Result<ExecOutput, SessionError> {
        match self {
            Self::Node { endpoint, .. } => endpoint.run(command).await,
            Self::Slurm(slurm) => slurm.run(command).await,
        }
    }

    pub async fn extract(
        &self,
        command: &str,
        patterns: ExtractionSpec,
    ) -> Result<Launched, SessionError> {
        match self {
            Self::Node { endpoint, .. } => {
                let (process, pending) = endpoint.extract(command, patterns).await?;
                Ok(Launched {
                    process,
                    pending,
                    jobid: None,
                })
            }
            Self::Slurm(slurm) => slurm.extract(command, patterns).await,
        }
    }

    /// A node to work on plus whatever keeps it allocated. Named nodes need
    /// no holder process.
    pub async fn ensure_allocation(&self) -> Result<(String, Option<Allocation>), SessionError> {
        match self {
            Self::Node { node_name, .. } => Ok((node_name.clone(), None)),
            Self::Slurm(slurm) => {
                let allocation = slurm.ensure_allocation().await?;
                Ok((allocation.node_name.clone(), Some(allocation)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::FakeTransport;
    use std::sync::Arc;

    fn setup() -> (Arc<FakeTransport>, RemoteEndpoint, AllocationResolver) {
        let fake = Arc::new(FakeTransport::new());
        let login = RemoteEndpoint::new("login", fake.clone());
        (fake, login, AllocationResolver::new(".cluster", ".slurmtap"))
    }

    #[test]
    fn conflicting_options_are_rejected() {
        let cases = [
            (Some("cn1".to_string()), Some("12".to_string()), Vec::new()),
            (Some("cn1".to_string()), None, vec!["--gres=gpu:1".to_string()]),
            (None, Some("12".to_string()), vec!["-c".to_string(), "4".to_string()]),
        ];
        for (node, job, alloc) in cases {
            assert!(matches!(
                AllocationRequest::from_options(node, job, alloc),
                Err(SessionError::Configuration(_))
            ));
        }
    }

    #[test]
    fn single_options_map_to_variants() {
        assert_eq!(
            AllocationRequest::from_options(None, None, Vec::new()).expect("default"),
            AllocationRequest::Default
        );
        assert_eq!(
            AllocationRequest::from_options(None, Some("77".into()), Vec::new()).expect("job"),
            AllocationRequest::Job("77".into())
        );
        let req = AllocationRequest::from_options(None, None, vec!["--mem=8G".into()]).expect("alloc");
        assert!(req.is_fresh_allocation());
    }

    #[tokio::test]
    async fn named_node_needs_no_remote_call() {
        let (fake, login, resolver) = setup();
        let resolved = resolver
            .resolve(&login, &AllocationRequest::Node("cn-a001".into()))
            .await
            .expect("resolve");
        assert_eq!(resolved.known_node(), Some("cn-a001"));
        assert!(fake.commands().is_empty());
        match resolved {
            ResolvedEndpoint::Node { endpoint, .. } => assert_eq!(endpoint.host(), "cn-a001.cluster"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn job_lookup_finds_node() {
        let (fake, login, resolver) = setup();
        fake.respond("squeue", ExecOutput::ok("cn-b007\n"));
        let resolved = resolver
            .resolve(&login, &AllocationRequest::Job("4242".into()))
            .await
            .expect("resolve");
        assert_eq!(resolved.known_node(), Some("cn-b007"));
        assert_eq!(
            fake.commands(),
            vec!["login: squeue --jobs 4242 -ho %N".to_string()]
        );
    }

    #[tokio::test]
    async fn job_lookup_with_no_node_fails() {
        let (fake, login, resolver) = setup();
        fake.respond("squeue", ExecOutput::ok("\n"));
        let err = resolver
            .resolve(&login, &AllocationRequest::Job("4242".into()))
            .await
            .expect_err("no node");
        assert!(matches!(err, SessionError::AllocationLookup(_)), "got: {err}");
    }

    #[tokio::test]
    async fn job_lookup_failure_is_a_lookup_error() {
        let (fake, login, resolver) = setup();
        fake.respond("squeue --jobs bogus", ExecOutput::failed(1, "Invalid job id specified"));
        let err = resolver
            .resolve(&login, &AllocationRequest::Job("bogus".into()))
            .await
            .expect_err("invalid id");
        assert!(matches!(err, SessionError::AllocationLookup(_)), "got: {err}");
    }

    #[tokio::test]
    async fn persist_rejected_for_direct_nodes() {
        let (_fake, login, resolver) = setup();
        let resolved = resolver
            .resolve(&login, &AllocationRequest::Node("cn1".into()))
            .await
            .expect("resolve");
        assert!(matches!(resolved.persist(), Err(SessionError::Configuration(_))));
    }

    #[tokio::test]
    async fn fresh_allocation_wraps_commands_in_srun() {
        let (fake, login, resolver) = setup();
        let resolved = resolver
            .resolve(&login, &AllocationRequest::ExtraArgs(vec!["--gres=gpu:1".into()]))
            .await
            .expect("resolve")
            .with_precommand("echo '####' $(hostname)");
        assert!(fake.commands().is_empty());
        resolved.run("nvidia-smi").await.expect("run");
        assert_eq!(
            fake.commands(),
            vec!["login: srun --gres=gpu:1 bash -c 'echo '\\''####'\\'' $(hostname) && nvidia-smi'"
                .to_string()]
        );
    }

    async fn persisted(fake: &Arc<FakeTransport>) -> ResolvedEndpoint {
        let login = RemoteEndpoint::new("login", fake.clone());
        AllocationResolver::new(".cluster", ".slurmtap")
            .resolve(&login, &AllocationRequest::Default)
            .await
            .expect("resolve")
            .persist()
            .expect("persist")
    }

    #[tokio::test]
    async fn persisted_extract_reports_jobid_on_submission() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond("sbatch --parsable", ExecOutput::ok("991\n"));
        fake.stream("tail -n +1 -f", &["#### compute7", "ready"], true);
        let resolved = persisted(&fake).await;
        assert!(resolved.is_persisted());

        let patterns = ExtractionSpec::new()
            .field(FIELD_NODE_NAME, "#### ([A-Za-z0-9_-]+)")
            .expect("spec");
        let launched = resolved.extract("serve", patterns).await.expect("extract");
        assert_eq!(launched.jobid.as_deref(), Some("991"));
        let mut process = launched.process;
        let result = launched.pending.wait().await.expect("fields");
        assert_eq!(result.get(FIELD_NODE_NAME), Some("compute7"));
        process.terminate().await;

        let payloads = fake.stdin_payloads();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].starts_with("#!/bin/bash\n#SBATCH --output=.slurmtap/batch/out-"));
        assert!(payloads[0].contains("\nserve\n"));

        let commands = fake.commands();
        let submit = commands
            .iter()
            .position(|c| c.starts_with("login: sbatch --parsable .slurmtap/batch/batch-"))
            .expect("sbatch submitted");
        let follow = commands
            .iter()
            .position(|c| c.contains("tail -n +1 -f"))
            .expect("output followed");
        assert!(submit < follow);
        let follow = &commands[follow];
        assert!(!follow.contains("sbatch"), "got: {follow}");
        assert!(follow.contains("squeue -h -j 991"), "got: {follow}");
        assert!(
            follow.contains("tail -n +1 -f --pid=$! .slurmtap/batch/out-"),
            "got: {follow}"
        );
    }

    #[tokio::test]
    async fn rejected_submission_is_an_allocation_error() {
        for output in [
            ExecOutput::failed(1, "sbatch: error: invalid partition specified"),
            ExecOutput::ok(""),
        ] {
            let fake = Arc::new(FakeTransport::new());
            fake.respond("sbatch", output);
            let resolved = persisted(&fake).await;
            let err = resolved
                .extract("serve", ExtractionSpec::new())
                .await
                .expect_err("no job");
            assert!(matches!(err, SessionError::AllocationGrant(_)), "got: {err}");
            assert!(fake.commands_containing("tail").is_empty());
        }
    }

    #[tokio::test]
    async fn follower_ending_with_the_job_fails_extraction() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond("sbatch --parsable", ExecOutput::ok("991"));
        fake.stream("tail -n +1 -f", &["slurmstepd: error: *** JOB 991 CANCELLED ***"], false);
        let resolved = persisted(&fake).await;
        let patterns = ExtractionSpec::new()
            .field(FIELD_NODE_NAME, "#### ([A-Za-z0-9_-]+)")
            .expect("spec");
        let launched = resolved.extract("serve", patterns).await.expect("extract");
        let err = launched.pending.wait().await.expect_err("job gone");
        assert!(
            matches!(err, SessionError::OutputExtraction { ref missing } if missing.len() == 1 && missing[0] == FIELD_NODE_NAME),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn persisted_allocation_keeps_the_submitted_jobid() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond("sbatch --parsable", ExecOutput::ok("77;cluster-a\n"));
        fake.stream("tail -n +1 -f", &["@@@ cn-d004 @@@"], true);
        let resolved = persisted(&fake).await;
        let (node, allocation) = resolved.ensure_allocation().await.expect("granted");
        assert_eq!(node, "cn-d004");
        let mut allocation = allocation.expect("holder process");
        assert_eq!(allocation.jobid.as_deref(), Some("77"));
        allocation.process.terminate().await;
    }

    #[test]
    fn parsable_output_yields_numeric_jobid() {
        assert_eq!(parse_parsable_jobid("991\n").as_deref(), Some("991"));
        assert_eq!(parse_parsable_jobid("77;cluster-a").as_deref(), Some("77"));
        assert_eq!(parse_parsable_jobid(""), None);
        assert_eq!(parse_parsable_jobid("Submitted batch job 5"), None);
    }

    #[tokio::test]
    async fn salloc_grant_yields_node_and_job() {
        let (fake, login, resolver) = setup();
        fake.stream(
            "salloc",
            &[
                "salloc: Granted job allocation 5150",
                "salloc: Nodes cn-c003 are ready for job",
            ],
            true,
        );
        let resolved = resolver
            .resolve(&login, &AllocationRequest::Default)
            .await
            .expect("resolve");
        let (node, allocation) = resolved.ensure_allocation().await.expect("granted");
        assert_eq!(node, "cn-c003");
        let mut allocation = allocation.expect("holder process");
        assert_eq!(allocation.jobid.as_deref(), Some("5150"));
        allocation.process.terminate().await;
        assert_eq!(fake.commands(), vec!["login: bash -c salloc".to_string()]);
    }

    #[tokio::test]
    async fn salloc_without_grant_is_an_allocation_error() {
        let (fake, login, resolver) = setup();
        fake.stream("salloc", &["salloc: error: invalid partition"], false);
        let resolved = resolver
            .resolve(&login, &AllocationRequest::Default)
            .await
            .expect("resolve");
        let err = resolved.ensure_allocation().await.expect_err("no grant");
        assert!(matches!(err, SessionError::AllocationGrant(_)), "got: {err}");
    }
}
