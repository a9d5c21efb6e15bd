use super::*;
use crate::converge::report::Transcript;
use crate::core::fixtures::resource;
use crate::core::{Document, Kind, Resource};
use crate::transport::fake::{FakeFile, FakeTransport, Operation};
use std::io::Cursor;
use tempfile::NamedTempFile;

const DESTINATION: &str = "/srv/app.conf";
const CONTENT: &[u8] = b"listen = 8080\nworkers = 4\n";

// A local source file holding CONTENT.
fn source() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONTENT).unwrap();
    file.flush().unwrap();
    file
}

// A host with user and group "deploy" (ID 1000) and an empty /srv.
fn host() -> FakeTransport {
    let transport = FakeTransport::new();
    transport.add_user("deploy", 1000);
    transport.add_group("deploy", 1000);
    transport.add_directory("/srv");
    transport
}

// The remote file in its desired state.
fn converged_file() -> FakeFile {
    FakeFile {
        mode: 0o100640,
        uid: 1000,
        gid: 1000,
        content: CONTENT.to_vec(),
    }
}

fn create_step(source: &NamedTempFile, owner: &str, group: &str) -> Resource {
    resource(&format!(
        r#"
        steps:
          - name: app config
            type: File
            action: create
            source: "{}"
            destination: {DESTINATION}
            owner: {owner}
            group: {group}
            mode: "0640"
        "#,
        source.path().display(),
    ))
}

fn converge(
    resource: &Resource,
    transport: &mut FakeTransport,
) -> (anyhow::Result<Outcome>, String) {
    let Kind::File(file) = resource.kind() else {
        panic!("bug in test: not a file");
    };
    let mut transcript = Transcript::new();
    let outcome = file.converge(&mut Context::new(transport, &mut transcript, resource));
    (outcome, transcript.text())
}

mod new {
    use super::*;

    fn build_error(yaml: &str) -> BuildError {
        Document::from_yaml(yaml).unwrap().build().unwrap_err()
    }

    #[test]
    fn create_requires_every_field() {
        assert_eq!(
            BuildError::MissingField {
                resource: "steps.File.create".to_string(),
                field: "owner",
            },
            build_error(
                "steps: [{type: File, action: create, source: a, destination: /b, \
                    group: root, mode: '0644'}]",
            ),
        );
    }

    #[test]
    fn delete_requires_file() {
        assert_eq!(
            BuildError::MissingField {
                resource: "steps.File.delete".to_string(),
                field: "file",
            },
            build_error("steps: [{type: File, action: delete, destination: /b}]"),
        );
    }

    #[test]
    fn rejects_invalid_modes() {
        for mode in ["'0999'", "'rw-r--r--'", "'12'", "'06444'"] {
            assert_eq!(
                BuildError::InvalidMode {
                    resource: "steps.File.create".to_string(),
                    mode: mode.trim_matches('\'').to_string(),
                },
                build_error(&format!(
                    "steps: [{{type: File, action: create, source: a, destination: /b, \
                        owner: root, group: root, mode: {mode}}}]",
                )),
            );
        }
    }

    #[test]
    fn rejects_integer_modes() {
        // YAML reads `0o644` as 420 and a bare `644` as 644; neither can be trusted as octal.
        for (mode, parsed) in [("0o644", "420"), ("644", "644"), ("0x1a4", "420")] {
            assert_eq!(
                BuildError::InvalidMode {
                    resource: "steps.File.create".to_string(),
                    mode: parsed.to_string(),
                },
                build_error(&format!(
                    "steps: [{{type: File, action: create, source: a, destination: /b, \
                        owner: root, group: root, mode: {mode}}}]",
                )),
            );
        }
    }

    #[test]
    fn accepts_three_or_four_digit_modes() {
        let cases = [
            ("'0640'", 0o640),
            ("'755'", 0o755),
            ("0644", 0o644),
            ("'4755'", 0o4755),
        ];
        for (mode, expected) in cases {
            let resource = resource(&format!(
                "steps: [{{type: File, action: create, source: a, destination: /b, \
                    owner: 0, group: 0, mode: {mode}}}]",
            ));
            let Kind::File(File::Create { mode, owner, .. }) = resource.kind() else {
                panic!("expected a file to create");
            };
            assert_eq!(expected, *mode);
            assert_eq!("0", owner);
        }
    }
}

mod create {
    use super::*;

    #[test]
    fn creates_a_missing_file() {
        let source = source();
        let resource = create_step(&source, "deploy", "deploy");
        let mut transport = host();

        let (outcome, text) = converge(&resource, &mut transport);
        assert_eq!(Outcome::Applied, outcome.unwrap());
        assert_eq!(Some(converged_file()), transport.file(DESTINATION));
        assert_eq!(
            "Creating new file: /srv/app.conf\n\
            Updating file mode: 0644 => 0640\n\
            Updating file owner and group: 0:0 => 1000:1000\n\
            Updating file content\n",
            text,
        );
        assert_eq!(Some(&"touch /srv/app.conf".to_string()), transport.commands().first());
    }

    #[test]
    fn is_idempotent() {
        let source = source();
        let resource = create_step(&source, "deploy", "deploy");
        let mut transport = host();
        converge(&resource, &mut transport).0.unwrap();
        transport.clear_log();

        let (outcome, text) = converge(&resource, &mut transport);
        assert_eq!(
            Outcome::Skipped(
                "file already converged to the desired state: /srv/app.conf".to_string(),
            ),
            outcome.unwrap(),
        );
        assert_eq!(Vec::<Operation>::new(), transport.file_mutations());
        assert!(!transport.commands().iter().any(|c| c.starts_with("touch")));
        assert_eq!(
            "File already exists: /srv/app.conf\n\
            File already has correct mode: 0640\n\
            File already has correct owner and group: 1000:1000\n\
            File already has correct content\n\
            Skipped app config: file already converged to the desired state: /srv/app.conf\n",
            text,
        );
    }

    #[test]
    fn fixes_only_the_mode() {
        let source = source();
        let resource = create_step(&source, "deploy", "deploy");
        let mut transport = host();
        transport.add_file(
            DESTINATION,
            FakeFile {
                mode: 0o100666,
                ..converged_file()
            },
        );

        assert_eq!(Outcome::Applied, converge(&resource, &mut transport).0.unwrap());
        assert_eq!(
            vec![Operation::Chmod(DESTINATION.into(), 0o640)],
            transport.file_mutations(),
        );
        assert_eq!(Some(converged_file()), transport.file(DESTINATION));
    }

    #[test]
    fn fixes_only_the_owner() {
        let source = source();
        let resource = create_step(&source, "deploy", "deploy");
        let mut transport = host();
        transport.add_file(
            DESTINATION,
            FakeFile {
                uid: 0,
                ..converged_file()
            },
        );

        assert_eq!(Outcome::Applied, converge(&resource, &mut transport).0.unwrap());
        assert_eq!(
            vec![Operation::Chown(DESTINATION.into(), 1000, 1000)],
            transport.file_mutations(),
        );
    }

    #[test]
    fn fixes_only_the_content_when_sizes_match() {
        let source = source();
        let resource = create_step(&source, "deploy", "deploy");
        let mut transport = host();
        let mut stale = CONTENT.to_vec();
        stale[0] = b'L';
        transport.add_file(
            DESTINATION,
            FakeFile {
                content: stale,
                ..converged_file()
            },
        );

        assert_eq!(Outcome::Applied, converge(&resource, &mut transport).0.unwrap());
        assert_eq!(
            vec![Operation::Write(DESTINATION.into())],
            transport.file_mutations(),
        );
        assert_eq!(Some(converged_file()), transport.file(DESTINATION));
    }

    #[test]
    fn rewrites_content_of_a_different_size_without_reading_it() {
        let source = source();
        let resource = create_step(&source, "deploy", "deploy");
        let mut transport = host();
        transport.add_file(
            DESTINATION,
            FakeFile {
                content: b"a much longer, entirely different configuration file\n".repeat(10),
                ..converged_file()
            },
        );

        assert_eq!(Outcome::Applied, converge(&resource, &mut transport).0.unwrap());
        assert!(!transport
            .operations()
            .contains(&Operation::Read(DESTINATION.into())));
        assert_eq!(Some(converged_file()), transport.file(DESTINATION));
    }

    #[test]
    fn numeric_ids_need_no_lookup() {
        let source = source();
        let resource = create_step(&source, "1000", "1000");
        let mut transport = host();

        assert_eq!(Outcome::Applied, converge(&resource, &mut transport).0.unwrap());
        assert_eq!(vec!["touch /srv/app.conf"], transport.commands());
        assert_eq!(Some(converged_file()), transport.file(DESTINATION));
    }

    #[test]
    fn looks_up_names_on_the_host() {
        let source = source();
        let resource = create_step(&source, "deploy", "deploy");
        let mut transport = host();
        transport.add_file(DESTINATION, converged_file());

        converge(&resource, &mut transport).0.unwrap();
        assert_eq!(
            vec![
                "id -u deploy",
                r#"getent group deploy | awk -F: '{printf "%d",$3}'"#,
            ],
            transport.commands(),
        );
    }

    #[test]
    fn unknown_user_is_an_error() {
        let source = source();
        let resource = create_step(&source, "nobody-here", "deploy");
        let mut transport = host();

        let error = converge(&resource, &mut transport).0.unwrap_err();
        assert!(error.to_string().contains("nobody-here"), "{error}");
        assert_eq!(0, transport.remote().open_file_sessions);
    }

    #[test]
    fn unknown_group_is_an_error() {
        let source = source();
        let resource = create_step(&source, "deploy", "nogroup-here");
        let mut transport = host();

        let error = converge(&resource, &mut transport).0.unwrap_err();
        assert!(error.to_string().contains("nogroup-here"), "{error}");
    }

    #[test]
    fn failed_touch_returns_its_status() {
        let source = source();
        let resource = resource(&format!(
            "steps: [{{type: File, action: create, source: '{}', destination: /missing/app.conf, \
                owner: 0, group: 0, mode: '0644'}}]",
            source.path().display(),
        ));
        let mut transport = host();
        // The parent directory exists for listing purposes, but touch still fails.
        transport.add_directory("/missing");
        transport.respond("touch /missing/app.conf", 1, "touch: Permission denied\n");

        let (outcome, text) = converge(&resource, &mut transport);
        assert_eq!(Outcome::Failed(1), outcome.unwrap());
        assert!(text.ends_with("touch: Permission denied\n"), "{text}");
        assert_eq!(0, transport.remote().open_file_sessions);
    }

    #[test]
    fn missing_source_is_an_error() {
        let resource = resource(
            "steps: [{type: File, action: create, source: /nonexistent/source, \
                destination: /srv/app.conf, owner: 0, group: 0, mode: '0644'}]",
        );
        let mut transport = host();

        let error = converge(&resource, &mut transport).0.unwrap_err();
        assert!(error.to_string().contains("/nonexistent/source"), "{error}");
    }
}

mod delete {
    use super::*;

    const DELETE: &str = "steps: [{name: old log, type: File, action: delete, file: /srv/old.log}]";

    #[test]
    fn removes_an_existing_file() {
        let resource = resource(DELETE);
        let mut transport = host();
        transport.add_file("/srv/old.log", FakeFile::default());

        let (outcome, text) = converge(&resource, &mut transport);
        assert_eq!(Outcome::Applied, outcome.unwrap());
        assert_eq!(vec!["rm /srv/old.log"], transport.commands());
        assert_eq!(None, transport.file("/srv/old.log"));
        assert_eq!("Deleting file: /srv/old.log\n", text);
    }

    #[test]
    fn is_idempotent() {
        let resource = resource(DELETE);
        let mut transport = host();

        let (outcome, text) = converge(&resource, &mut transport);
        assert_eq!(
            Outcome::Skipped("file already deleted: /srv/old.log".to_string()),
            outcome.unwrap(),
        );
        assert!(transport.commands().is_empty());
        assert_eq!("Skipped old log: file already deleted: /srv/old.log\n", text);
    }

    #[test]
    fn returns_rm_status() {
        let resource = resource(DELETE);
        let mut transport = host();
        transport.add_file("/srv/old.log", FakeFile::default());
        transport.respond("rm /srv/old.log", 1, "rm: Operation not permitted\n");

        assert_eq!(Outcome::Failed(1), converge(&resource, &mut transport).0.unwrap());
        assert_eq!(0, transport.remote().open_file_sessions);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let resource = resource("steps: [{type: File, action: delete, file: /nowhere/old.log}]");
        assert!(converge(&resource, &mut host()).0.is_err());
    }
}

mod same_content {
    use super::*;

    // Yields at most three bytes per read, to exercise partial reads.
    struct Trickle<R>(R);

    impl<R: Read> Read for Trickle<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(3);
            self.0.read(&mut buf[..len])
        }
    }

    #[test]
    fn equal() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 5];
        assert!(same_content(Cursor::new(&data), Trickle(Cursor::new(&data))).unwrap());
    }

    #[test]
    fn differ_in_last_chunk() {
        let a = vec![7u8; CHUNK_SIZE * 2 + 5];
        let mut b = a.clone();
        *b.last_mut().unwrap() = 8;
        assert!(!same_content(Cursor::new(a), Cursor::new(b)).unwrap());
    }

    #[test]
    fn differ_in_length() {
        assert!(!same_content(Cursor::new(b"abc"), Cursor::new(b"abcd")).unwrap());
    }

    #[test]
    fn empty() {
        assert!(same_content(io::empty(), io::empty()).unwrap());
    }
}
