/// Integration tests for the Docker sandbox
///
/// These tests verify the real execution path:
/// 1. Exit codes, timeouts and OOM kills are classified correctly
/// 2. Programs read and write the staged files through bind mounts
/// 3. The evaluator produces verdicts from real container runs
/// 4. Compilation success and failure are reported as responses

#[cfg(test)]
mod docker_tests {
    use crate::compiler::Compiler;
    use crate::config::LanguageConfigManager;
    use crate::engine::{ContainerSpec, DockerEngine, DockerProgram};
    use crate::evaluator::Evaluator;
    use crate::permissions::NoopPermissionReset;
    use crate::runner::{Program, ProgramArgs, Termination};
    use crate::staging::{FileLinker, PROGRAM_AREA};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use verdict_common::config::JudgeConfig;
    use verdict_common::types::{CompileRequest, EvalResult, TestCase, TestGroup, Verdict};

    const IMAGE: &str = "alpine:3.20";

    const LANGUAGES: &str = r#"{"languages": [
        {"id": "shell", "name": "Shell", "version": "busybox", "image": "alpine:3.20",
         "compile": "cp \"$1\" main.sh && chmod +x main.sh", "run": "./main.sh",
         "memory_limit_mb": 64, "cpu_limit": 1.0},
        {"id": "broken", "name": "Broken", "version": "0", "image": "alpine:3.20",
         "compile": "echo 'syntax error on line 1' >&2; exit 1", "run": "./main.sh",
         "memory_limit_mb": 64, "cpu_limit": 1.0}
    ]}"#;

    fn spec(cmd: &[&str], timeout_ms: u64, memory_mb: i64) -> ContainerSpec {
        ContainerSpec {
            image: IMAGE.to_string(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            binds: Vec::new(),
            memory_bytes: memory_mb * 1024 * 1024,
            nano_cpus: 1_000_000_000,
            timeout: Duration::from_millis(timeout_ms),
            capture_logs: true,
        }
    }

    /// Test: Non-zero exits are reported with their code
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_exit_code_is_reported() {
        let engine = DockerEngine::connect().expect("Failed to create Docker engine");
        let run = engine
            .run(&spec(&["sh", "-c", "echo out; echo err >&2; exit 3"], 10_000, 64))
            .await
            .unwrap();

        assert_eq!(run.status.termination, Termination::Exited(3));
        assert!(run.status.crashed());
        assert_eq!(run.stdout.trim(), "out");
        assert_eq!(run.stderr.trim(), "err");
    }

    /// Test: Timeouts kill the container
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_timeout_kills_container() {
        let engine = DockerEngine::connect().expect("Failed to create Docker engine");
        let started = std::time::Instant::now();
        let run = engine.run(&spec(&["sleep", "30"], 500, 64)).await.unwrap();

        assert!(run.status.timed_out());
        assert!(!run.status.crashed());
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    /// Test: Exceeding the memory limit is a crash, not a timeout
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_memory_limit_is_crash() {
        let engine = DockerEngine::connect().expect("Failed to create Docker engine");
        let run = engine
            .run(&spec(&["sh", "-c", "head -c 512m /dev/zero | tail"], 30_000, 32))
            .await
            .unwrap();

        assert!(run.status.crashed());
        assert!(!run.status.timed_out());
    }

    struct Sandbox {
        program_dir: PathBuf,
        sandbox_root: PathBuf,
        data_dir: PathBuf,
        _tmp: tempfile::TempDir,
    }

    fn sandbox(script: &str) -> Sandbox {
        let tmp = tempfile::tempdir().unwrap();
        let program_dir = tmp.path().join("program");
        let sandbox_root = tmp.path().join("submission");
        let data_dir = tmp.path().join("data");
        for dir in [&program_dir, &sandbox_root, &data_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }
        let main = program_dir.join("main.sh");
        std::fs::write(&main, script).unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&main, std::fs::Permissions::from_mode(0o755)).unwrap();
        Sandbox {
            program_dir,
            sandbox_root,
            data_dir,
            _tmp: tmp,
        }
    }

    fn program(sb: &Sandbox) -> DockerProgram {
        let languages = LanguageConfigManager::from_json(LANGUAGES).unwrap();
        let engine = DockerEngine::connect().expect("Failed to create Docker engine");
        DockerProgram::new(
            engine,
            languages.get_config("shell").unwrap(),
            &sb.program_dir,
            &sb.sandbox_root,
        )
        .unwrap()
    }

    /// Test: stdin/stdout/stderr are redirected to the configured files
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_program_uses_staged_files() {
        let sb = sandbox("#!/bin/sh\nread n\necho $((n * 2))\necho \"args: $*\" >&2\n");
        let input = sb.sandbox_root.join("input");
        std::fs::write(&input, "21\n").unwrap();

        let mut program = program(&sb);
        program.set_args(ProgramArgs {
            input_path: input,
            output_path: sb.sandbox_root.join("output"),
            error_path: sb.sandbox_root.join("error"),
            time_limit_ms: 10_000,
            memory_limit_kb: 65_536,
            extra_args: vec!["a".to_string(), "b c".to_string()],
        });
        let status = program.execute().await.unwrap();

        assert_eq!(status.termination, Termination::Exited(0));
        assert_eq!(std::fs::read_to_string(sb.sandbox_root.join("output")).unwrap(), "42\n");
        assert_eq!(std::fs::read_to_string(sb.sandbox_root.join("error")).unwrap(), "args: a b c\n");
    }

    /// Test: Full evaluation against real containers
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_evaluator_with_docker_program() {
        let sb = sandbox("#!/bin/sh\nread n\nif [ \"$n\" -lt 0 ]; then exit 1; fi\necho $((n * 2))\n");
        let case = |name: &str, input: &str, answer: &str| {
            let input_path = sb.data_dir.join(format!("{}.in", name));
            let output_path = sb.data_dir.join(format!("{}.ans", name));
            std::fs::write(&input_path, input).unwrap();
            std::fs::write(&output_path, answer).unwrap();
            TestCase {
                name: name.to_string(),
                input_path,
                output_path,
            }
        };
        let groups = vec![
            TestGroup {
                cases: vec![case("1", "5\n", "10\n"), case("2", "7\n", "14\n")],
                score: 30,
            },
            TestGroup {
                cases: vec![case("3", "-1\n", "-2\n")],
                score: 70,
            },
        ];

        let mut evaluator = Evaluator::new(
            &sb.sandbox_root,
            Box::new(program(&sb)),
            Arc::new(NoopPermissionReset),
        )
        .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        evaluator.evaluate(&groups, 10_000, 65_536, tx).await.unwrap();

        let mut results = Vec::new();
        while let Some(r) = rx.recv().await {
            results.push(r);
        }
        let verdicts: Vec<Verdict> = results.iter().map(EvalResult::verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::Accepted,
                Verdict::Accepted,
                Verdict::Accepted,
                Verdict::RunTimeError,
                Verdict::RunTimeError,
                Verdict::Accepted,
            ]
        );
        assert!(matches!(results.last(), Some(EvalResult::Submission { score: 30, .. })));
    }

    /// Test: The staged input is mounted read-only, even for root in the container
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_staged_input_is_read_only_in_container() {
        let sb = sandbox("#!/bin/sh\nread n\necho $n\nrm -f \"$1\" 2>/dev/null\necho TAMPERED > \"$1\" || exit 3\n");
        let source = sb.data_dir.join("1.in");
        std::fs::write(&source, "7\n").unwrap();

        let linker = FileLinker::new(sb.sandbox_root.join(PROGRAM_AREA)).unwrap();
        linker.link_file(&source, "input", false).unwrap();
        let input_path = linker.path_for("input", false);

        let mut program = program(&sb);
        program.set_args(ProgramArgs {
            input_path: input_path.clone(),
            output_path: sb.sandbox_root.join("output"),
            error_path: sb.sandbox_root.join("error"),
            time_limit_ms: 10_000,
            memory_limit_kb: 65_536,
            extra_args: vec![input_path.display().to_string()],
        });
        let status = program.execute().await.unwrap();

        assert_eq!(status.termination, Termination::Exited(3));
        assert_eq!(std::fs::read_to_string(&input_path).unwrap(), "7\n");
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "7\n");
    }

    fn compiler(programs_root: PathBuf) -> Compiler {
        let config = JudgeConfig {
            programs_root,
            compile_time_limit_ms: 60_000,
            ..Default::default()
        };
        let languages = Arc::new(LanguageConfigManager::from_json(LANGUAGES).unwrap());
        Compiler::new(DockerEngine::connect().unwrap(), languages, &config)
    }

    /// Test: A successful compile yields a runnable program directory
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_compile_success() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("solution.sh");
        std::fs::write(&source, "#!/bin/sh\necho hi\n").unwrap();

        let response = compiler(tmp.path().join("programs"))
            .compile(&CompileRequest {
                identifier: "ok".to_string(),
                language_id: "shell".to_string(),
                source_files: vec![source],
                output_dir: PathBuf::from("ok"),
            })
            .await
            .unwrap();

        let program = response.program.expect("compile should succeed");
        assert!(program.dir.join("main.sh").exists());
    }

    /// Test: Compiler diagnostics are returned without a program
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_compile_failure_returns_diagnostics() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("solution.sh");
        std::fs::write(&source, "whatever").unwrap();

        let response = compiler(tmp.path().join("programs"))
            .compile(&CompileRequest {
                identifier: "bad".to_string(),
                language_id: "broken".to_string(),
                source_files: vec![source],
                output_dir: PathBuf::from("bad"),
            })
            .await
            .unwrap();

        assert!(response.program.is_none());
        assert!(response.errors.contains("syntax error on line 1"));
    }
}
