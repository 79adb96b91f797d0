use companion_launch::{
    process::control::{Liveness, OsProcesses, ProcessControl},
    program::ProgramSpec,
    supervisor::{ExitCallback, Timings},
    LaunchError,
};
use companion_launch_tests::fixtures::{
    pid_exists, sigterm_ignorer, sleeper, supervisor, supervisor_with, system_bin, wait_until,
};
use companion_launch_tests::process::ManagedProcess;
use futures::FutureExt;
use std::{
    process::Command,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_killing_main_tears_down_every_program() {
    let sup = supervisor();
    let specs = vec![
        sleeper("chat", 60),
        sleeper("overlay", 60),
        sleeper("sim", 60).main(),
    ];

    let report = sup.start_all(&specs, 4).await.unwrap();
    assert_eq!(report.main.as_deref(), Some("sim"));
    assert_eq!(sup.running_program_names(), vec!["chat", "overlay", "sim"]);

    let target = sup.main_target().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let on_exit: ExitCallback = {
        let sup = sup.clone();
        let fired = fired.clone();
        Box::new(move || {
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
                tokio::task::spawn_blocking(move || sup.terminate_all()).await?;
                eyre::Ok(())
            }
            .boxed()
        })
    };
    sup.watch_main(on_exit).unwrap();

    unsafe {
        libc::kill(target.pid as i32, libc::SIGKILL);
    }

    // One poll interval plus the termination grace window, with slack for CI
    let elapsed = wait_until(Duration::from_secs(4), || {
        sup.running_program_names().is_empty()
    })
    .await;
    assert!(elapsed.is_some(), "programs still tracked: {:?}", sup.running_program_names());

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!sup.is_watching());
    sup.stop_watching().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_main_starts_no_helpers() {
    let sup = supervisor();
    let specs = vec![
        sleeper("chat", 60),
        ProgramSpec::new("sim", "/nonexistent/companion_launch/sim").main(),
    ];

    let err = sup.start_all(&specs, 4).await.unwrap_err();

    assert!(matches!(err, LaunchError::MissingExecutable { .. }));
    assert!(sup.running_program_names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_main_that_exits_immediately_is_reported() {
    let sup = supervisor();
    let specs = vec![
        sleeper("chat", 60),
        ProgramSpec::new("sim", system_bin("false")).main(),
    ];

    let err = sup.start_all(&specs, 4).await.unwrap_err();

    assert!(matches!(err, LaunchError::DiedOnLaunch { code: Some(1), .. }));
    assert!(sup.running_program_names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stubborn_helper_is_killed() {
    let sup = supervisor_with(Timings {
        termination_grace: Duration::from_millis(300),
        ..Timings::default()
    });
    let specs = vec![sigterm_ignorer("stubborn"), sleeper("sim", 60).main()];
    sup.start_all(&specs, 4).await.unwrap();

    // Give the shell time to install its trap
    tokio::time::sleep(Duration::from_millis(300)).await;
    let pids: Vec<u32> = ["stubborn", "sim"]
        .iter()
        .map(|name| {
            assert!(sup.is_program_running(name));
            find_pid(&sup, name)
        })
        .collect();

    let sup2 = sup.clone();
    tokio::task::spawn_blocking(move || {
        assert!(sup2.terminate("stubborn"));
        assert!(sup2.terminate("stubborn"));
        sup2.terminate_all();
        sup2.terminate_all();
    })
    .await
    .unwrap();

    for pid in pids {
        assert!(!pid_exists(pid), "PID {pid} survived termination");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_running_names_drop_programs_that_exit() {
    let sup = supervisor();
    let specs = vec![sleeper("short", 1), sleeper("sim", 60).main()];
    sup.start_all(&specs, 4).await.unwrap();

    let elapsed = wait_until(Duration::from_secs(5), || {
        sup.running_program_names() == vec!["sim".to_string()]
    })
    .await;
    assert!(elapsed.is_some());
    assert!(!sup.is_program_running("short"));

    let sup2 = sup.clone();
    tokio::task::spawn_blocking(move || sup2.terminate_all())
        .await
        .unwrap();
}

#[test]
fn test_probe_distinguishes_zombies() {
    let control = OsProcesses::new();

    let mut exited = ManagedProcess::spawn(&mut Command::new(system_bin("true"))).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    // Not reaped yet: the kernel keeps a zombie entry
    assert_eq!(control.probe(exited.id()).unwrap(), Liveness::Zombie);
    assert!(exited.try_reap().unwrap());
    assert_eq!(control.probe(exited.id()).unwrap(), Liveness::Gone);

    let running =
        ManagedProcess::spawn(Command::new(system_bin("sleep")).arg("30")).unwrap();
    assert_eq!(control.probe(running.id()).unwrap(), Liveness::Alive);
}

fn find_pid(sup: &companion_launch::Supervisor, name: &str) -> u32 {
    sup.tracked_pid(name)
        .unwrap_or_else(|| panic!("'{name}' is not tracked"))
}
