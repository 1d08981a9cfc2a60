//! Venv-mode materialization (§4.6): a double launch — two processes
//! racing to materialize the same venv for the same archive/interpreter
//! pair — must converge on one finalized venv and one short alias,
//! regardless of which one wins the populate-then-rename race.

use std::sync::Arc;

use archive_launch::activate::Distribution;
use archive_launch::interpreter::InterpreterHandle;
use archive_launch::manifest::VenvLayoutPolicy;
use archive_launch::venv::{DefaultVenvPopulator, Materializer};

fn fake_interpreter(dir: &std::path::Path) -> InterpreterHandle {
    let python = dir.join("python3.11");
    std::fs::write(&python, b"#!/bin/sh\n").unwrap();
    InterpreterHandle {
        binary: python.clone(),
        realpath: python,
        version: semver::Version::new(3, 11, 4),
        implementation: "cpython".into(),
        sys_path: vec![],
        site_packages: vec![],
        extras_paths: vec![],
        is_virtualenv: false,
    }
}

#[test]
fn repeated_materialization_reuses_the_same_alias() {
    let dir = tempfile::tempdir().unwrap();
    let interpreter = fake_interpreter(dir.path());
    let dist_location = dir.path().join("dist");
    std::fs::create_dir_all(&dist_location).unwrap();
    let distributions = vec![Distribution {
        project_name: "app".into(),
        version: "0.1".into(),
        location: dist_location,
        namespace_packages: vec![],
    }];

    let materializer = Materializer {
        venv_root: dir.path().join("venvs"),
        populator: &DefaultVenvPopulator,
    };

    let first = materializer
        .materialize("archive-hash", &interpreter, &distributions, VenvLayoutPolicy::Copy)
        .unwrap();
    let second = materializer
        .materialize("archive-hash", &interpreter, &distributions, VenvLayoutPolicy::Copy)
        .unwrap();

    assert_eq!(first.alias_dir, second.alias_dir);
    assert_eq!(first.launcher, second.launcher);
    assert!(first.launcher.exists());
}

#[test]
fn concurrent_materializers_converge_on_one_finalized_venv() {
    let dir = tempfile::tempdir().unwrap();
    let interpreter = fake_interpreter(dir.path());
    let dist_location = dir.path().join("dist");
    std::fs::create_dir_all(&dist_location).unwrap();
    let distributions = Arc::new(vec![Distribution {
        project_name: "app".into(),
        version: "0.1".into(),
        location: dist_location,
        namespace_packages: vec![],
    }]);

    let venv_root = Arc::new(dir.path().join("venvs"));
    let interpreter = Arc::new(interpreter);

    // Two threads race to materialize the identical (archive, interpreter)
    // key. `populate_then_rename`'s first-writer-wins semantics (§4.4/§4.6)
    // mean both must observe the same finalized venv directory and the
    // same short alias, with no corrupted half-populated tree left behind.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let venv_root = Arc::clone(&venv_root);
            let interpreter = Arc::clone(&interpreter);
            let distributions = Arc::clone(&distributions);
            std::thread::spawn(move || {
                let materializer = Materializer {
                    venv_root: (*venv_root).clone(),
                    populator: &DefaultVenvPopulator,
                };
                materializer
                    .materialize("shared-archive-hash", &interpreter, &distributions, VenvLayoutPolicy::Copy)
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first_alias = &results[0].alias_dir;
    for result in &results {
        assert_eq!(&result.alias_dir, first_alias);
        assert!(result.launcher.exists());
    }
}
