//! PTY runner against small shell scripts.
//!
//! Environments without PTY support (some CI sandboxes) report
//! `LaunchFailed`; those tests log and return early.
#![cfg(unix)]

mod common;

use std::time::Duration;

use common::fixtures::{process_running, read_pid_file, wait_for_exit, write_script};
use common::logger::TestLogger;
use quotaprobe::core::pty::{
    PortablePtyRunner, PtyRequest, RunError, TerminalRunner, Transcript, TriggerTable,
};
use tempfile::TempDir;

struct Sandbox {
    scripts: TempDir,
    scratch: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            scripts: TempDir::new().expect("scripts dir"),
            scratch: TempDir::new().expect("scratch dir"),
        }
    }

    fn runner(&self) -> PortablePtyRunner {
        PortablePtyRunner::with_scratch_dir(self.scratch.path())
    }

    fn script(&self, name: &str, body: &str) -> String {
        write_script(self.scripts.path(), name, body)
            .to_string_lossy()
            .into_owned()
    }
}

fn completed(log: &TestLogger, result: Result<Transcript, RunError>) -> Option<Transcript> {
    match result {
        Ok(transcript) => {
            log.transcript("transcript", &transcript.output);
            Some(transcript)
        }
        Err(RunError::LaunchFailed(reason)) => {
            log.warn(&format!("skipping, PTY unavailable: {reason}"));
            None
        }
        Err(other) => panic!("unexpected run error: {other:?}"),
    }
}

#[tokio::test]
async fn answers_trigger_once() {
    let log = TestLogger::new("answers_trigger_once");
    let sandbox = Sandbox::new();
    let script = sandbox.script(
        "trusting.sh",
        "printf 'Do you trust the files in this folder? '\nread answer\necho \"answer=$answer\"",
    );

    log.phase("run");
    let request = PtyRequest::new(script)
        .timeout(Duration::from_secs(10))
        .triggers(TriggerTable::from_pairs(&[(
            "Do you trust the files in this folder?",
            "y\r",
        )]));
    let Some(transcript) = completed(&log, sandbox.runner().run(request).await) else {
        return;
    };

    assert_eq!(
        transcript.answered,
        vec!["Do you trust the files in this folder?".to_string()]
    );
    assert!(transcript.clean().contains("answer=y"));
    assert_eq!(transcript.exit_code, Some(0));
    assert!(!transcript.stopped_early);
    log.finish_ok();
}

#[tokio::test]
async fn writes_initial_input() {
    let log = TestLogger::new("writes_initial_input");
    let sandbox = Sandbox::new();
    let script = sandbox.script("command.sh", "read line\necho \"received:$line\"");

    let request = PtyRequest::new(script)
        .input("/status\n")
        .timeout(Duration::from_secs(10));
    let Some(transcript) = completed(&log, sandbox.runner().run(request).await) else {
        return;
    };

    assert!(transcript.clean().contains("received:/status"));
    log.finish_ok();
}

#[tokio::test]
async fn stop_marker_ends_run_early() {
    let log = TestLogger::new("stop_marker_ends_run_early");
    let sandbox = Sandbox::new();
    let script = sandbox.script("tui.sh", "echo 'Weekly limit 40% left'\nsleep 30");

    let request = PtyRequest::new(script)
        .timeout(Duration::from_secs(10))
        .stop_on(["Weekly limit"])
        .settle(Duration::from_millis(100));
    let Some(transcript) = completed(&log, sandbox.runner().run(request).await) else {
        return;
    };

    assert!(transcript.stopped_early);
    assert!(transcript.clean().contains("Weekly limit 40% left"));
    assert!(log.elapsed_ms() < 10_000);
    log.finish_ok();
}

#[tokio::test]
async fn hanging_process_times_out() {
    let log = TestLogger::new("hanging_process_times_out");
    let sandbox = Sandbox::new();
    let script = sandbox.script("hang.sh", "sleep 30");

    let request = PtyRequest::new(script).timeout(Duration::from_millis(500));
    match sandbox.runner().run(request).await {
        Err(RunError::TimedOut(after)) => assert_eq!(after, Duration::from_millis(500)),
        Err(RunError::LaunchFailed(reason)) => log.warn(&format!("skipping: {reason}")),
        other => panic!("expected timeout, got {other:?}"),
    }
    log.finish_ok();
}

#[tokio::test]
async fn runs_in_scratch_dir_by_default() {
    let log = TestLogger::new("runs_in_scratch_dir_by_default");
    let sandbox = Sandbox::new();
    let script = sandbox.script("where.sh", "pwd");

    let request = PtyRequest::new(script).timeout(Duration::from_secs(10));
    let Some(transcript) = completed(&log, sandbox.runner().run(request).await) else {
        return;
    };

    let scratch_name = sandbox
        .scratch
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .expect("scratch dir name");
    assert!(transcript.clean().contains(scratch_name));
    log.finish_ok();
}

#[tokio::test]
async fn sets_terminal_type() {
    let log = TestLogger::new("sets_terminal_type");
    let sandbox = Sandbox::new();
    let script = sandbox.script("term.sh", "echo \"term=$TERM\"");

    let request = PtyRequest::new(script).timeout(Duration::from_secs(10));
    let Some(transcript) = completed(&log, sandbox.runner().run(request).await) else {
        return;
    };

    assert!(transcript.clean().contains("term=xterm-256color"));
    log.finish_ok();
}

#[tokio::test]
async fn missing_binary_is_reported() {
    let sandbox = Sandbox::new();
    let missing = sandbox.scripts.path().join("not-installed");

    let request = PtyRequest::new(missing.to_string_lossy()).timeout(Duration::from_secs(1));
    let err = sandbox.runner().run(request).await.unwrap_err();
    assert!(matches!(err, RunError::BinaryNotFound(_)));
}

const TRUST_PROMPT: &str = "Do you trust the files in this folder?";

fn trust_triggers() -> TriggerTable {
    TriggerTable::from_pairs(&[(TRUST_PROMPT, "y\r")])
}

#[tokio::test]
async fn reshown_prompt_is_not_answered_again() {
    // A second answer would let the script print "second=" and exit.
    let log = TestLogger::new("reshown_prompt_is_not_answered_again");
    let sandbox = Sandbox::new();
    let script = sandbox.script(
        "reprompt.sh",
        &format!(
            "printf '{TRUST_PROMPT} '\nread first\necho \"first=$first\"\nprintf '{TRUST_PROMPT} '\nread second\necho \"second=$second\""
        ),
    );

    let request = PtyRequest::new(script)
        .timeout(Duration::from_secs(3))
        .triggers(trust_triggers());
    match sandbox.runner().run(request).await {
        Err(RunError::TimedOut(after)) => assert_eq!(after, Duration::from_secs(3)),
        Err(RunError::LaunchFailed(reason)) => log.warn(&format!("skipping: {reason}")),
        other => panic!("expected timeout after a single answer, got {other:?}"),
    }
    assert!(log.elapsed_ms() < 10_000);
    log.finish_ok();
}

#[tokio::test]
async fn reshown_prompt_still_ends_on_stop_marker() {
    let log = TestLogger::new("reshown_prompt_still_ends_on_stop_marker");
    let sandbox = Sandbox::new();
    let script = sandbox.script(
        "reprompt_tui.sh",
        &format!(
            "printf '{TRUST_PROMPT} '\nread first\necho \"first=$first\"\nprintf '{TRUST_PROMPT} '\necho 'Weekly limit 40% left'\nread second\necho \"second=$second\"\nsleep 30"
        ),
    );

    let request = PtyRequest::new(script)
        .timeout(Duration::from_secs(10))
        .triggers(trust_triggers())
        .stop_on(["Weekly limit"])
        .settle(Duration::from_millis(300));
    let Some(transcript) = completed(&log, sandbox.runner().run(request).await) else {
        return;
    };

    let text = transcript.clean();
    assert_eq!(transcript.answered, vec![TRUST_PROMPT.to_string()]);
    assert_eq!(text.matches(TRUST_PROMPT).count(), 2);
    assert!(text.contains("first=y"));
    assert!(!text.contains("second="));
    assert!(transcript.stopped_early);
    log.finish_ok();
}

#[tokio::test]
async fn prompt_split_across_reads_after_long_output() {
    let log = TestLogger::new("prompt_split_across_reads_after_long_output");
    let sandbox = Sandbox::new();
    let script = sandbox.script(
        "chatty.sh",
        r#"i=0
while [ $i -lt 3000 ]; do printf '\033[2mline %s of startup noise\033[0m\n' "$i"; i=$((i+1)); done
printf 'Do you trust the '
sleep 1
printf '\033[1mfiles in this folder?\033[0m '
read answer
echo "answer=$answer""#,
    );

    let request = PtyRequest::new(script)
        .timeout(Duration::from_secs(15))
        .triggers(trust_triggers());
    let Some(transcript) = completed(&log, sandbox.runner().run(request).await) else {
        return;
    };

    assert_eq!(transcript.answered, vec![TRUST_PROMPT.to_string()]);
    assert!(transcript.clean().contains("answer=y"));
    assert_eq!(transcript.exit_code, Some(0));
    log.finish_ok();
}

#[tokio::test]
async fn dropping_a_run_kills_the_child() {
    let log = TestLogger::new("dropping_a_run_kills_the_child");
    let sandbox = Sandbox::new();
    let pid_file = sandbox.scratch.path().join("child.pid");
    let script = sandbox.script(
        "stuck.sh",
        &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
    );

    let runner = sandbox.runner();
    let request = PtyRequest::new(script).timeout(Duration::from_secs(30));
    let mut run = tokio::spawn(async move { runner.run(request).await });

    let pid = tokio::select! {
        pid = read_pid_file(&pid_file) => pid,
        finished = &mut run => {
            match finished.expect("run task") {
                Err(RunError::LaunchFailed(reason)) => {
                    log.warn(&format!("skipping: {reason}"));
                    return;
                }
                other => panic!("run ended before cancellation: {other:?}"),
            }
        }
    };
    assert!(process_running(pid));

    log.phase("cancel");
    run.abort();
    assert!(wait_for_exit(pid).await, "child {pid} outlived its run");
    log.finish_ok();
}
