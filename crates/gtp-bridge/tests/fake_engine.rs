//! Engine adapter tests against a scripted shell fake that speaks just
//! enough GTP: blank-line-terminated `=`/`?` frames over stdio.

#![cfg(unix)]

use gtp_bridge::{Engine, EngineOptions, EnginePool, EngineState, GtpError, Role};

/// A minimal GTP engine as a shell one-liner.
fn fake_engine_argv() -> Vec<String> {
    let script = r#"
while read line; do
  case "$line" in
    list_commands*) printf '= genmove\nplay\nkgs-time_settings\n\n' ;;
    genmove*) printf '= q16\n\n' ;;
    boom*) printf '? unknown command\n\n' ;;
    garbage*) printf 'not a gtp reply\n\n' ;;
    die*) exit 3 ;;
    quit*) printf '=\n\n'; exit 0 ;;
    *) printf '=\n\n' ;;
  esac
done
"#;
    vec!["sh".into(), "-c".into(), script.into()]
}

async fn spawn_fake() -> Engine {
    let mut engine =
        Engine::spawn(&fake_engine_argv(), EngineOptions::default()).expect("spawn fake engine");
    engine.handshake().await.expect("handshake");
    engine
}

#[tokio::test]
async fn handshake_discovers_capabilities() {
    let engine = spawn_fake().await;
    assert!(engine.caps().kgs_time_settings);
    assert!(!engine.caps().kata_time_settings);
    assert_eq!(engine.state(), EngineState::Ready);
    engine.kill();
}

#[tokio::test]
async fn genmove_resolves_with_body() {
    let engine = spawn_fake().await;
    let reply = engine.command("genmove black").await.unwrap();
    assert_eq!(reply, "q16");
    engine.kill();
}

#[tokio::test]
async fn failure_frame_sets_failed() {
    let engine = spawn_fake().await;
    let err = engine.command("boom").await.unwrap_err();
    assert_eq!(err, GtpError::ProtocolFailure("unknown command".into()));
    assert!(engine.failed());

    // The engine is degraded but not dead; later commands still work.
    assert_eq!(engine.command("genmove white").await.unwrap(), "q16");
    engine.kill();
}

#[tokio::test]
async fn violation_frame_is_unexpected_output() {
    let engine = spawn_fake().await;
    let err = engine.command("garbage").await.unwrap_err();
    assert!(matches!(err, GtpError::UnexpectedOutput(_)));
    assert!(engine.failed());
    engine.kill();
}

#[tokio::test]
async fn death_mid_command_fails_pending_then_everything() {
    let engine = spawn_fake().await;
    let err = engine.command("die").await.unwrap_err();
    assert_eq!(err, GtpError::EngineExited);
    assert!(engine.failed());
    assert!(engine.is_dead());
    assert_eq!(engine.state(), EngineState::Dead);

    // Subsequent commands fail fast without touching the process.
    let err = engine.command("genmove black").await.unwrap_err();
    assert_eq!(err, GtpError::DeadEngine);
}

#[tokio::test]
async fn kill_then_command_is_dead_engine() {
    let engine = spawn_fake().await;
    engine.kill();
    let err = engine.command("genmove black").await.unwrap_err();
    assert_eq!(err, GtpError::DeadEngine);
}

#[tokio::test]
async fn pool_hands_out_and_recovers_capacity() {
    let pool = EnginePool::start(Role::Main, fake_engine_argv(), 2, EngineOptions::default())
        .await
        .expect("pool start");
    assert_eq!(pool.count_available(), 2);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    assert_eq!(pool.count_available(), 0);

    pool.release(a);
    assert_eq!(pool.count_available(), 1);

    // Returning a dead engine triggers an async respawn.
    let _ = b.command("die").await;
    assert!(b.is_dead());
    pool.release(b);
    for _ in 0..50 {
        if pool.count_available() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(pool.count_available(), 2);
}

#[tokio::test]
async fn chat_tags_surface_on_stderr_stream() {
    let script = r#"
printf 'DISCUSSION: hello humans\n' >&2
printf 'MALKOVICH:deep thoughts\n' >&2
printf 'plain diagnostic\n' >&2
while read line; do
  case "$line" in
    list_commands*) printf '= genmove\n\n' ;;
    quit*) exit 0 ;;
    *) printf '=\n\n' ;;
  esac
done
"#;
    let argv: Vec<String> = vec!["sh".into(), "-c".into(), script.into()];
    let opts = EngineOptions {
        chat_extraction: true,
        ..EngineOptions::default()
    };
    let mut engine = Engine::spawn(&argv, opts).expect("spawn");
    let mut events = engine.take_stderr_events().expect("stderr stream");
    engine.handshake().await.expect("handshake");

    use gtp_bridge::StderrEvent;
    let first = events.recv().await.unwrap();
    assert_eq!(
        first,
        StderrEvent::Chat {
            channel: "discussion".into(),
            body: "hello humans".into()
        }
    );
    let second = events.recv().await.unwrap();
    assert_eq!(
        second,
        StderrEvent::Chat {
            channel: "malkovich".into(),
            body: "deep thoughts".into()
        }
    );
    let third = events.recv().await.unwrap();
    assert_eq!(third, StderrEvent::Line("plain diagnostic".into()));
    engine.kill();
}
