//! Handle lifecycle: release on every path, state checks on read-back and
//! validation ahead of the engine.

mod common;

use gmt_bridge::{
    BridgeError, HandleState, InputRef, ModuleArgs, OutputKind, ReadBackReason, RegistrationFailure,
};
use gmt_bridge_test::{
    clear_faults, inject, sample_grid, status, take_reports, verify_clean_shutdown, verify_sessions_closed, xy_table,
    Fault, TEST_SESSION_NAME,
};
use gmt_types::{Column, ContainerKind, DType, Increments, Table};
use pretty_assertions::assert_eq;

#[test]
fn test_failed_dispatch_releases_everything() {
    let engine = common::engine();
    let table = xy_table(3);

    let err = engine
        .scoped(|session| {
            session.run_module("nosuchmodule", &[InputRef::from(&table)], Some(OutputKind::Table), |inputs, output| {
                ModuleArgs::new().arg(inputs[0]).output(output.unwrap_or_default())
            })
        })
        .unwrap_err();

    match &err {
        BridgeError::ModuleExecution {
            module,
            status: code,
            native_message,
        } => {
            assert_eq!(module, "nosuchmodule");
            assert_eq!(*code, status::MODULE_NOT_FOUND);
            assert!(native_message.contains("Shared GMT module not found: nosuchmodule"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_native());
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_failed_run_module_releases_its_handles() {
    let engine = common::engine();
    let grid = sample_grid();
    let table = xy_table(2);

    engine
        .scoped(|session| {
            let kept = session.register_input(&table)?;
            let err = session
                .run_module(
                    "gmtconvert",
                    &[InputRef::from(&grid)],
                    Some(OutputKind::Table),
                    |inputs, output| ModuleArgs::new().arg(inputs[0]).output(output.unwrap_or_default()),
                )
                .unwrap_err();
            assert_eq!(err.status(), Some(status::RUNTIME_ERROR));

            // Only the handle registered outside the call is left.
            assert_eq!(session.open_handles(), 1);
            assert_eq!(kept.state(), Some(HandleState::Registered));
            kept.release()?;
            assert_eq!(session.open_handles(), 0);
            Ok(())
        })
        .unwrap();

    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_module_runtime_error_keeps_handles_registered() {
    let engine = common::engine();
    let grid = sample_grid();

    engine
        .scoped(|session| {
            let input = session.register_input(&grid)?;
            let output = session.register_output(OutputKind::Table)?;
            let err = session
                .dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))
                .unwrap_err();
            assert_eq!(err.status(), Some(status::RUNTIME_ERROR));
            assert!(err.native_message().unwrap().contains("expected a table"));

            // A failed call leaves both handles where they were.
            assert_eq!(input.state(), Some(HandleState::Registered));
            assert_eq!(output.state(), Some(HandleState::Registered));
            assert_eq!(session.open_handles(), 2);
            Ok(())
        })
        .unwrap();

    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_registration_faults_leave_nothing_behind() {
    let engine = common::engine();
    let table = xy_table(4);

    for call in ["GMT_Create_Data", "GMT_Put_Vector", "GMT_Open_VirtualFile"] {
        engine
            .scoped(|session| {
                inject(Fault::Fail(call));
                let err = session.register_input(&table).unwrap_err();
                let BridgeError::Registration { reason, .. } = &err else {
                    panic!("{}: unexpected error {}", call, err);
                };
                match call {
                    "GMT_Create_Data" => assert_eq!(reason, &RegistrationFailure::CreateData),
                    "GMT_Put_Vector" => assert!(matches!(reason, RegistrationFailure::PutVector { .. })),
                    _ => assert_eq!(reason, &RegistrationFailure::OpenVirtualFile),
                }
                assert_eq!(session.open_handles(), 0);
                Ok(())
            })
            .unwrap();
        clear_faults();
    }

    verify_sessions_closed(TEST_SESSION_NAME, 3).unwrap();
}

#[test]
fn test_unusable_names_are_rejected() {
    let engine = common::engine();
    let table = xy_table(2);

    engine
        .scoped(|session| {
            let first = session.register_input(&table)?;

            inject(Fault::VirtualFileName(first.name().to_string()));
            let err = session.register_input(&table).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::Registration {
                    reason: RegistrationFailure::DuplicateName { ref name },
                    ..
                } if name == first.name()
            ));

            for bad in ["bad name", ""] {
                inject(Fault::VirtualFileName(bad.to_string()));
                let err = session.register_output(OutputKind::Table).unwrap_err();
                assert!(matches!(
                    err,
                    BridgeError::Registration {
                        reason: RegistrationFailure::InvalidName { .. },
                        ..
                    }
                ));
            }

            // The rejected duplicate did not disturb the original.
            assert_eq!(session.open_handles(), 1);
            assert_eq!(first.state(), Some(HandleState::Registered));
            first.release()
        })
        .unwrap();

    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_dropped_handles_and_sessions_clean_up() {
    let engine = common::engine();
    let table = xy_table(2);

    {
        let session = engine.open().unwrap();
        {
            let _input = session.register_input(&table).unwrap();
            assert_eq!(session.open_handles(), 1);
        }
        assert_eq!(session.open_handles(), 0);

        // Left registered; closing the session releases it.
        let kept = session.register_output(OutputKind::Grid).unwrap();
        std::mem::forget(kept);
        assert_eq!(session.open_handles(), 1);
    }

    assert_eq!(engine.open_sessions(), 0);
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_close_is_idempotent() {
    let engine = common::engine();
    let mut session = engine.open().unwrap();
    assert_eq!(engine.open_sessions(), 1);

    session.close().unwrap();
    assert!(session.is_closed());
    session.close().unwrap();
    assert_eq!(engine.open_sessions(), 0);

    let err = session.register_input(&xy_table(1)).unwrap_err();
    assert!(matches!(err, BridgeError::SessionClosed { .. }));
    let err = session.dispatch("gmtconvert", &ModuleArgs::new()).unwrap_err();
    assert!(matches!(err, BridgeError::SessionClosed { operation: "run a module" }));

    drop(session);
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_read_back_state_checks() {
    let engine = common::engine();
    let table = xy_table(3);

    engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            let output = session.register_output(OutputKind::Table)?;

            let err = output.read_back().unwrap_err();
            assert!(matches!(
                err,
                BridgeError::ReadBack {
                    reason: ReadBackReason::NotDispatched,
                    ..
                }
            ));

            let err = session.read_back(input.name()).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::ReadBack {
                    reason: ReadBackReason::NotAnOutput,
                    ..
                }
            ));

            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            assert_eq!(input.state(), Some(HandleState::Dispatched));
            assert_eq!(output.state(), Some(HandleState::Dispatched));

            assert_eq!(output.read_table(None)?.n_rows(), 3);
            assert_eq!(output.state(), Some(HandleState::Consumed));
            let err = output.read_table(None).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::ReadBack {
                    reason: ReadBackReason::AlreadyConsumed,
                    ..
                }
            ));
            Ok(())
        })
        .unwrap();

    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_unknown_handles() {
    let engine = common::engine();

    engine
        .scoped(|session| {
            let err = session.read_back("@GMTAPI@-999999").unwrap_err();
            assert!(matches!(err, BridgeError::UnknownHandle { ref name } if name == "@GMTAPI@-999999"));

            let output = session.register_output(OutputKind::Table)?;
            let name = output.name().to_string();
            session.release(&name)?;
            assert_eq!(session.handle_state(&name), None);

            // The second release finds nothing and frees nothing.
            let err = session.release(&name).unwrap_err();
            assert!(matches!(err, BridgeError::UnknownHandle { .. }));
            drop(output);
            Ok(())
        })
        .unwrap();

    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_handles_do_not_cross_sessions() {
    let engine = common::engine();
    let a = engine.open().unwrap();
    let b = engine.open().unwrap();

    let ours = a.register_output(OutputKind::Grid).unwrap();
    let theirs = b.register_output(OutputKind::Grid).unwrap();
    assert_ne!(ours.name(), theirs.name());

    let err = b.release(ours.name()).unwrap_err();
    assert!(matches!(err, BridgeError::ForeignHandle { ref name, owner } if name == ours.name() && owner == a.id()));
    let err = b.read_back(ours.name()).unwrap_err();
    assert!(matches!(err, BridgeError::ForeignHandle { .. }));
    assert_eq!(a.open_handles(), 1);
    assert_eq!(b.open_handles(), 1);
    assert_eq!(ours.state(), Some(HandleState::Registered));
    assert_eq!(theirs.state(), Some(HandleState::Registered));

    // A name already live in another session is refused at registration.
    inject(Fault::VirtualFileName(ours.name().to_string()));
    let err = b.register_output(OutputKind::Table).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Registration {
            reason: RegistrationFailure::DuplicateName { ref name },
            ..
        } if name == ours.name()
    ));
    assert_eq!(b.open_handles(), 1);

    let name = ours.name().to_string();
    ours.release().unwrap();
    assert!(matches!(b.release(&name).unwrap_err(), BridgeError::UnknownHandle { .. }));
    theirs.release().unwrap();

    drop((a, b));
    verify_sessions_closed(TEST_SESSION_NAME, 2).unwrap();
}

#[test]
fn test_output_the_module_never_wrote() {
    let engine = common::engine();

    engine
        .scoped(|session| {
            let output = session.register_output(OutputKind::Table)?;
            let args = ModuleArgs::new().flag('R', "0/10/0/5").switch('B').output(output.name());
            session.dispatch("basemap", &args)?;
            assert_eq!(output.state(), Some(HandleState::Dispatched));

            let err = output.read_table(None).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::ReadBack {
                    reason: ReadBackReason::NotPopulated,
                    ..
                }
            ));

            let region = session.extract_region()?;
            assert_eq!(region.wesn(), [0.0, 10.0, 0.0, 5.0]);
            Ok(())
        })
        .unwrap();

    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_output_of_the_wrong_kind() {
    let engine = common::engine();
    let table = xy_table(3);
    let grid = sample_grid();

    engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            let output = session.register_output(OutputKind::Grid)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            let err = output.read_grid().unwrap_err();
            match err {
                BridgeError::ReadBack {
                    reason: ReadBackReason::UnexpectedKind { expected, found },
                    ..
                } => {
                    assert_eq!(expected, OutputKind::Grid);
                    assert_eq!(found, ContainerKind::Table);
                }
                other => panic!("unexpected error: {}", other),
            }
            // The unread dataset is freed with the handle.
            Ok(())
        })
        .unwrap();

    engine
        .scoped(|session| {
            let input = session.register_input(&grid)?;
            let output = session.register_output(OutputKind::Unknown)?;
            session.dispatch("grdconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            let err = output.read_table(None).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::ReadBack {
                    reason: ReadBackReason::UnexpectedKind {
                        expected: OutputKind::Table,
                        found: ContainerKind::Grid,
                    },
                    ..
                }
            ));
            // Still readable as what it is.
            assert_eq!(output.read_grid()?, grid);
            Ok(())
        })
        .unwrap();

    verify_sessions_closed(TEST_SESSION_NAME, 2).unwrap();
}

#[test]
fn test_validation_precedes_native_calls() {
    let engine = common::engine();

    engine
        .scoped(|session| {
            let too_big = Table::new(vec![Column::new("id", vec![1i64, 1 << 60])]);
            let err = session.register_input(&too_big).unwrap_err();
            match &err {
                BridgeError::UnsupportedDType { column, dtype, .. } => {
                    assert_eq!(column, "id");
                    assert_eq!(*dtype, DType::Int64);
                }
                other => panic!("unexpected error: {}", other),
            }
            assert!(err.is_validation());

            let ragged = Table::default()
                .with_column("x", vec![1.0, 2.0, 3.0])
                .with_column("y", vec![1.0, 2.0]);
            let err = session.register_input(&ragged).unwrap_err();
            assert!(matches!(err, BridgeError::ShapeMismatch { .. }));
            assert!(err.is_validation());

            let mut bad_grid = sample_grid();
            bad_grid.increments = Increments::uniform(0.5);
            let err = session.register_input(&bad_grid).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidGridSpec { .. }));

            let err = session.dispatch("gmtconvert", &ModuleArgs::new().arg("")).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidArgument { .. }));
            let err = session.dispatch("gmt convert", &ModuleArgs::new()).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidArgument { .. }));

            assert_eq!(session.open_handles(), 0);
            Ok(())
        })
        .unwrap();

    // Nothing was created in the engine, so nothing leaked.
    let reports = verify_clean_shutdown(TEST_SESSION_NAME).unwrap();
    assert_eq!(reports.len(), 1);
}

#[test]
fn test_teardown_failure_is_reported() {
    let engine = common::engine();
    let table = xy_table(2);

    let err = engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            inject(Fault::Fail("GMT_Close_VirtualFile"));
            input.release()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Native {
            call: "GMT_Close_VirtualFile",
            status: status::INJECTED_FAILURE,
            ..
        }
    ));
    clear_faults();

    // The container was still destroyed; only the virtual file stayed open.
    let reports = take_reports();
    let report = reports.iter().find(|r| r.name == TEST_SESSION_NAME).unwrap();
    assert_eq!(report.live_objects, 0);
    assert_eq!(report.open_virtual_files.len(), 1);
}
