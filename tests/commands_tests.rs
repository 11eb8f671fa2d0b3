//! Tests for instruction executors: metadata semantics, path handling,
//! and filesystem effects against a scratch build root.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use strata::commands::{Command, ExecEnv};
use strata::dockerfile::{parse_command, BuildArgs};
use strata::fsutil::Filesystem;
use strata::image::Config;
use strata::resolve::resolve_environment_replacement;

struct Fixture {
    root: TempDir,
    context: TempDir,
    work: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            context: TempDir::new().unwrap(),
            work: TempDir::new().unwrap(),
        }
    }

    fn fs(&self) -> Filesystem {
        Filesystem::new(self.root.path().to_path_buf(), &[self.work.path().to_path_buf()])
    }

    fn root_path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }
}

/// Parses and runs one instruction against the fixture.
fn run_command(
    fixture: &Fixture,
    config: &mut Config,
    args: &mut BuildArgs,
    line: &str,
) -> strata::Result<Command> {
    let fs = fixture.fs();
    let env = ExecEnv {
        fs: &fs,
        context_root: fixture.context.path().to_path_buf(),
        work_dir: fixture.work.path().to_path_buf(),
    };
    let instruction = parse_command(line)?;
    let mut command = Command::from_instruction(&instruction)?.expect("executable instruction");
    command.execute(config, args, &env)?;
    Ok(command)
}

// =============================================================================
// ENV / ARG
// =============================================================================

#[test]
fn test_env_sets_and_replaces_bindings() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ENV A=1 B=2").unwrap();
    run_command(&fixture, &mut config, &mut args, "ENV A=3").unwrap();
    assert_eq!(config.env, vec!["A=3", "B=2"]);
}

#[test]
fn test_env_resolves_references_to_existing_env() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ENV BASE=/opt").unwrap();
    run_command(&fixture, &mut config, &mut args, "ENV HOME=$BASE/home").unwrap();
    assert!(config.env.contains(&"HOME=/opt/home".to_string()));
}

#[test]
fn test_env_wins_over_arg_for_expansion() {
    // ENV K=V after ARG K=W: later $K expansions must yield V.
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ARG K=W").unwrap();
    run_command(&fixture, &mut config, &mut args, "ENV K=V").unwrap();

    let envs = args.replacement_envs(&config.env);
    let expanded = resolve_environment_replacement("$K", &envs, false).unwrap();
    assert_eq!(expanded, "V");
}

#[test]
fn test_arg_declares_for_later_expansion() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&["VERSION=9".to_string()]);

    run_command(&fixture, &mut config, &mut args, "ARG VERSION=1").unwrap();
    let envs = args.replacement_envs(&config.env);
    assert_eq!(
        resolve_environment_replacement("$VERSION", &envs, false).unwrap(),
        "9"
    );
}

// =============================================================================
// Metadata Family
// =============================================================================

#[test]
fn test_expose_defaults_to_tcp() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "EXPOSE 8080 9090/udp").unwrap();
    let ports = config.exposed_ports.as_ref().unwrap();
    assert!(ports.contains_key("8080/tcp"));
    assert!(ports.contains_key("9090/udp"));
}

#[test]
fn test_expose_rejects_bad_protocol() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);
    assert!(run_command(&fixture, &mut config, &mut args, "EXPOSE 80/carrier-pigeon").is_err());
}

#[test]
fn test_volume_records_and_creates_directories() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    let command =
        run_command(&fixture, &mut config, &mut args, "VOLUME /data /logs").unwrap();

    assert!(config.volumes.as_ref().unwrap().contains_key("/data"));
    assert!(fixture.root_path("data").is_dir());
    assert!(fixture.root_path("logs").is_dir());
    let files = command.files_to_snapshot().unwrap();
    assert_eq!(files.len(), 2);
}

#[test]
fn test_label_resolves_values() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ENV REV=abc123").unwrap();
    run_command(&fixture, &mut config, &mut args, "LABEL revision=$REV").unwrap();
    assert_eq!(
        config.labels.as_ref().unwrap().get("revision").map(String::as_str),
        Some("abc123")
    );
}

#[test]
fn test_cmd_shell_form_prepends_shell() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "CMD echo hi").unwrap();
    assert_eq!(
        config.cmd.as_ref().unwrap(),
        &vec!["/bin/sh".to_string(), "-c".to_string(), "echo hi".to_string()]
    );
    assert!(config.args_escaped);
}

#[test]
fn test_cmd_honors_custom_shell() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "SHELL [\"/bin/bash\", \"-eu\", \"-c\"]")
        .unwrap();
    run_command(&fixture, &mut config, &mut args, "CMD echo hi").unwrap();
    assert_eq!(
        config.cmd.as_ref().unwrap(),
        &vec![
            "/bin/bash".to_string(),
            "-eu".to_string(),
            "-c".to_string(),
            "echo hi".to_string()
        ]
    );
}

#[test]
fn test_entrypoint_exec_form_is_verbatim() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ENTRYPOINT [\"/srv/app\", \"--port\", \"80\"]")
        .unwrap();
    assert_eq!(
        config.entrypoint.as_ref().unwrap(),
        &vec!["/srv/app".to_string(), "--port".to_string(), "80".to_string()]
    );
}

#[test]
fn test_onbuild_records_raw_expression() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ONBUILD COPY app /app").unwrap();
    assert_eq!(
        config.on_build.as_ref().unwrap(),
        &vec!["COPY app /app".to_string()]
    );
}

#[test]
fn test_stopsignal_and_healthcheck_are_recorded() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "STOPSIGNAL SIGQUIT").unwrap();
    run_command(&fixture, &mut config, &mut args, "HEALTHCHECK CMD true").unwrap();
    assert_eq!(config.stop_signal.as_deref(), Some("SIGQUIT"));
    assert_eq!(config.healthcheck.as_ref().unwrap().test[0], "CMD-SHELL");
}

#[test]
fn test_metadata_commands_report_no_snapshot_files() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    let command = run_command(&fixture, &mut config, &mut args, "ENV A=1").unwrap();
    assert_eq!(command.files_to_snapshot(), Some(Vec::new()));
    assert!(command.cache_command(strata::Image::empty()).is_none());
    assert!(!command.uses_context());
}

// =============================================================================
// WORKDIR
// =============================================================================

#[test]
fn test_workdir_absolute_and_relative() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "WORKDIR /srv").unwrap();
    assert_eq!(config.working_dir, "/srv");

    run_command(&fixture, &mut config, &mut args, "WORKDIR app").unwrap();
    assert_eq!(config.working_dir, "/srv/app");
    assert!(fixture.root_path("srv/app").is_dir());
}

#[test]
fn test_workdir_resolves_env() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ENV APP_HOME=/opt/app").unwrap();
    let command =
        run_command(&fixture, &mut config, &mut args, "WORKDIR $APP_HOME").unwrap();
    assert_eq!(config.working_dir, "/opt/app");
    assert_eq!(
        command.files_to_snapshot().unwrap(),
        vec![fixture.root_path("opt/app")]
    );
}

// =============================================================================
// COPY
// =============================================================================

#[test]
fn test_copy_file_into_directory_dest() {
    let fixture = Fixture::new();
    fs::write(fixture.context.path().join("foo.txt"), "bar").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    let command =
        run_command(&fixture, &mut config, &mut args, "COPY foo.txt /tmp/").unwrap();

    assert_eq!(
        fs::read_to_string(fixture.root_path("tmp/foo.txt")).unwrap(),
        "bar"
    );
    assert_eq!(
        command.files_to_snapshot().unwrap(),
        vec![fixture.root_path("tmp/foo.txt")]
    );
    assert!(command.uses_context());
}

#[test]
fn test_copy_file_to_file_dest() {
    let fixture = Fixture::new();
    fs::write(fixture.context.path().join("in.cfg"), "x=1").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "COPY in.cfg /etc/out.cfg").unwrap();
    assert_eq!(
        fs::read_to_string(fixture.root_path("etc/out.cfg")).unwrap(),
        "x=1"
    );
}

#[test]
fn test_copy_directory_copies_contents() {
    let fixture = Fixture::new();
    let src = fixture.context.path().join("site");
    fs::create_dir_all(src.join("css")).unwrap();
    fs::write(src.join("index.html"), "<html>").unwrap();
    fs::write(src.join("css/main.css"), "body{}").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "COPY site /var/www/").unwrap();

    assert_eq!(
        fs::read_to_string(fixture.root_path("var/www/index.html")).unwrap(),
        "<html>"
    );
    assert_eq!(
        fs::read_to_string(fixture.root_path("var/www/css/main.css")).unwrap(),
        "body{}"
    );
    assert!(
        !fixture.root_path("var/www/site").exists(),
        "the directory itself is not copied"
    );
}

#[test]
fn test_copy_relative_dest_uses_workdir() {
    let fixture = Fixture::new();
    fs::write(fixture.context.path().join("tool"), "bin").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "WORKDIR /app").unwrap();
    run_command(&fixture, &mut config, &mut args, "COPY tool bin/").unwrap();
    assert!(fixture.root_path("app/bin/tool").is_file());
}

#[test]
fn test_copy_glob_sources() {
    let fixture = Fixture::new();
    fs::write(fixture.context.path().join("a.conf"), "a").unwrap();
    fs::write(fixture.context.path().join("b.conf"), "b").unwrap();
    fs::write(fixture.context.path().join("c.other"), "c").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "COPY *.conf /etc/app/").unwrap();
    assert!(fixture.root_path("etc/app/a.conf").exists());
    assert!(fixture.root_path("etc/app/b.conf").exists());
    assert!(!fixture.root_path("etc/app/c.other").exists());
}

#[test]
fn test_copy_multiple_sources_need_directory_dest() {
    let fixture = Fixture::new();
    fs::write(fixture.context.path().join("a"), "a").unwrap();
    fs::write(fixture.context.path().join("b"), "b").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    assert!(run_command(&fixture, &mut config, &mut args, "COPY a b /one").is_err());
}

#[test]
fn test_copy_missing_source_errors() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);
    assert!(run_command(&fixture, &mut config, &mut args, "COPY ghost /tmp/").is_err());
}

#[test]
fn test_copy_from_prior_stage_root() {
    let fixture = Fixture::new();
    // Simulate stage 0's extracted filesystem under the work dir.
    let stage_fs = fixture.work.path().join("0");
    fs::create_dir_all(stage_fs.join("out")).unwrap();
    fs::write(stage_fs.join("out/artifact"), "built").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    let command = run_command(
        &fixture,
        &mut config,
        &mut args,
        "COPY --from=0 /out/artifact /srv/artifact",
    )
    .unwrap();

    assert_eq!(
        fs::read_to_string(fixture.root_path("srv/artifact")).unwrap(),
        "built"
    );
    assert!(!command.uses_context(), "--from reads stage output, not context");
}

#[test]
fn test_copy_env_resolution_in_paths() {
    let fixture = Fixture::new();
    fs::write(fixture.context.path().join("data.bin"), "d").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ENV TARGET=/opt/payload").unwrap();
    run_command(&fixture, &mut config, &mut args, "COPY data.bin $TARGET/").unwrap();
    assert!(fixture.root_path("opt/payload/data.bin").exists());
}

// =============================================================================
// ADD
// =============================================================================

#[test]
fn test_add_extracts_local_tar() {
    let fixture = Fixture::new();
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_ustar();
    let content = b"unpacked";
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "nested/file.txt", &content[..]).unwrap();
    let tar_bytes = builder.into_inner().unwrap();
    fs::write(fixture.context.path().join("bundle.tar"), tar_bytes).unwrap();

    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);
    let command =
        run_command(&fixture, &mut config, &mut args, "ADD bundle.tar /srv/").unwrap();

    assert_eq!(
        fs::read_to_string(fixture.root_path("srv/nested/file.txt")).unwrap(),
        "unpacked"
    );
    assert!(!fixture.root_path("srv/bundle.tar").exists());
    assert!(!command.files_to_snapshot().unwrap().is_empty());
}

#[test]
fn test_add_plain_file_behaves_like_copy() {
    let fixture = Fixture::new();
    fs::write(fixture.context.path().join("notes.txt"), "plain").unwrap();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "ADD notes.txt /docs/").unwrap();
    assert_eq!(
        fs::read_to_string(fixture.root_path("docs/notes.txt")).unwrap(),
        "plain"
    );
}

// =============================================================================
// USER
// =============================================================================

#[test]
fn test_user_numeric_ids_pass_without_passwd() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "USER 1000:1000").unwrap();
    assert_eq!(config.user, "1000:1000");
}

#[test]
fn test_user_name_must_exist_in_image() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    assert!(run_command(&fixture, &mut config, &mut args, "USER ghost").is_err());

    fs::create_dir_all(fixture.root_path("etc")).unwrap();
    fs::write(
        fixture.root_path("etc/passwd"),
        "root:x:0:0:root:/root:/bin/sh\napp:x:100:200:app:/srv:/bin/false\n",
    )
    .unwrap();
    run_command(&fixture, &mut config, &mut args, "USER app").unwrap();
    assert_eq!(config.user, "app");
}

// =============================================================================
// RUN
// =============================================================================

#[test]
fn test_run_executes_in_workdir() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "WORKDIR /build").unwrap();
    let command =
        run_command(&fixture, &mut config, &mut args, "RUN echo made > made.txt").unwrap();

    assert_eq!(
        fs::read_to_string(fixture.root_path("build/made.txt")).unwrap(),
        "made\n"
    );
    assert!(command.files_to_snapshot().is_none(), "RUN snapshots everything");
    assert!(command.is_cacheable());
}

#[test]
fn test_run_sees_replacement_envs() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "WORKDIR /out").unwrap();
    run_command(&fixture, &mut config, &mut args, "ENV GREETING=hello").unwrap();
    run_command(&fixture, &mut config, &mut args, "RUN echo $GREETING > g.txt").unwrap();

    assert_eq!(
        fs::read_to_string(fixture.root_path("out/g.txt")).unwrap(),
        "hello\n"
    );
}

#[test]
fn test_run_does_not_inherit_host_environment() {
    std::env::set_var("STRATA_HOST_ONLY", "leaked");
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    run_command(&fixture, &mut config, &mut args, "WORKDIR /probe").unwrap();
    run_command(
        &fixture,
        &mut config,
        &mut args,
        "RUN echo ${STRATA_HOST_ONLY:-absent} > env.txt",
    )
    .unwrap();

    assert_eq!(
        fs::read_to_string(fixture.root_path("probe/env.txt")).unwrap(),
        "absent\n"
    );
}

#[test]
fn test_run_nonzero_exit_fails() {
    let fixture = Fixture::new();
    let mut config = Config::default();
    let mut args = BuildArgs::new(&[]);

    let err = run_command(&fixture, &mut config, &mut args, "RUN exit 3").unwrap_err();
    match err {
        strata::Error::Exec { status, .. } => assert_eq!(status, 3),
        other => panic!("expected Exec error, got {other}"),
    }
}
