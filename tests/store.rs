use assert_call::{call, CallRecorder};
use futures::StreamExt;
use rt_local::{runtime::core::test, spawn_local, wait_for_idle};
use statemix::*;

#[derive(Clone, Debug, Default, PartialEq, Fields)]
struct Score {
    points: i64,
    level: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Fields)]
struct Player {
    name: String,
    #[fields(skip)]
    session: u64,
}

#[test]
fn score_board() {
    let mut cr = CallRecorder::new();
    let sc = Scheduler::new();
    let score = Store::with_options(
        &sc,
        Score::default(),
        StoreOptions::new()
            .validator(|u: &Patch| match u.get("points").and_then(Value::as_i64) {
                Some(p) if p < 0 => Validity::from("points must not be negative"),
                _ => Validity::Valid,
            })
            .middleware(|state: Score, _: &Patch, _: Next<Score>| -> Result<Score> {
                Ok(Score {
                    level: state.points / 100 + 1,
                    ..state
                })
            }),
    );
    let _s = score.subscribe(|s| call!("{} {}", s.points, s.level));

    score.update(|s| patch! { "points" => s.points + 150 }).unwrap();
    score.update(|s| patch! { "points" => s.points + 100 }).unwrap();
    assert!(score.update(|_| patch! { "points" => -1 }).is_err());
    sc.flush();
    cr.verify("250 3");

    let rank = computed(score.clone(), |s| if s.level >= 3 { "gold" } else { "silver" });
    assert_eq!(rank.value(), Ok("gold"));
    score.reset_default();
    sc.flush();
    cr.verify("0 0");
    assert_eq!(rank.value(), Ok("silver"));
}

#[test]
fn mixed_profile() {
    let mut cr = CallRecorder::new();
    let sc = Scheduler::new();
    let player = Store::new(
        &sc,
        Player {
            name: "alice".into(),
            session: 7,
        },
    );
    let score = Store::new(&sc, Score::default());
    let profile = mix_stores(&sc, &[&player, &score], StoreOptions::new());
    assert_eq!(
        profile.state(),
        record! { "name" => "alice", "points" => 0, "level" => 0 }
    );

    let summary = computed(profile.store().clone(), |p| {
        format!(
            "{}:{}",
            p.get("name").and_then(Value::as_str).unwrap_or(""),
            p.get("points").and_then(Value::as_i64).unwrap_or(0)
        )
    });
    let _s0 = player.subscribe(|p| call!("player {}", p.name));
    let _s1 = score.subscribe(|s| call!("score {}", s.points));

    score.update(|_| patch! { "points" => 10 }).unwrap();
    profile.update(|_| patch! { "name" => "bob" }).unwrap();
    sc.flush();
    cr.verify(["score 10", "player bob"]);
    assert_eq!(summary.value(), Ok("bob:10".to_string()));
    assert_eq!(player.state().session, 7);

    profile.cleanup();
    score.update(|_| patch! { "points" => 20 }).unwrap();
    sc.flush();
    cr.verify("score 20");
    assert_eq!(summary.value(), Ok("bob:10".to_string()));
}

#[test]
fn state_serializes_as_json() {
    let sc = Scheduler::new();
    let store = Store::new(&sc, record! { "name" => "alice", "tags" => vec!["a", "b"] });
    let json = serde_json::to_string(&store.state()).unwrap();
    assert_eq!(json, r#"{"name":"alice","tags":["a","b"]}"#);

    let patch: Patch = serde_json::from_str(r#"{"name":"bob"}"#).unwrap();
    store.update(|_| patch).unwrap();
    assert_eq!(
        store.state().get("name").and_then(Value::as_str),
        Some("bob")
    );
}

#[test]
async fn changes_stream() {
    let sc = Scheduler::with_mode(SchedulerMode::LocalExecutor);
    let store = Store::new(&sc, Score::default());
    let mut changes = store.changes();

    store.update(|_| patch! { "points" => 1 }).unwrap();
    store.update(|_| patch! { "points" => 2 }).unwrap();
    let first = changes.next().await.unwrap();
    assert_eq!(first.points, 2);

    spawn_local({
        let store = store.clone();
        async move {
            store.update(|_| patch! { "level" => 5 }).unwrap();
        }
    })
    .detach();
    let second = changes.next().await.unwrap();
    assert_eq!(*second, Score { points: 2, level: 5 });

    drop(changes);
    assert_eq!(store.listener_count(), 0);
    wait_for_idle().await;
}
