use crate::e2e::*;
use kiln::{BuildPath, Error, RecipeArgs, Rule, Session};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn slow_rule(target: &str, prereqs: Vec<kiln::Path>, counter: &Counter) -> Rule {
    let counter = counter.clone();
    Rule::new(target)
        .with_prereqs(prereqs)
        .with_recipe_fn(move |args: RecipeArgs| {
            let counter = counter.clone();
            async move {
                counter.bump();
                tokio::time::sleep(Duration::from_millis(50)).await;
                concat(&args)
            }
        })
}

#[tokio::test]
async fn concurrent_runs_build_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let reg = space.registry()?;
    let count = Counter::default();
    reg.add(slow_rule("out", vec![src("in")], &count))?;

    let (first, second) = tokio::join!(reg.run(None), reg.run(None));
    assert!(first?);
    assert!(second?);
    assert_eq!(count.get(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_on_threads_build_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let reg = Arc::new(space.registry()?);
    let count = Counter::default();
    reg.add(slow_rule("mid", vec![src("in")], &count))?;
    reg.add(slow_rule("out", vec![built("mid")], &count))?;

    let runs: Vec<_> = (0..4)
        .map(|_| {
            let reg = reg.clone();
            tokio::spawn(async move { reg.run(None).await })
        })
        .collect();
    for run in runs {
        assert!(run.await??);
    }
    assert_eq!(count.get(), 2);
    Ok(())
}

#[tokio::test]
async fn independent_targets_overlap() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let reg = space.registry()?;
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for name in ["a", "b", "c"] {
        let (running, peak) = (running.clone(), peak.clone());
        reg.add(Rule::new(name).with_recipe_fn(move |args: RecipeArgs| {
            let (running, peak) = (running.clone(), peak.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                concat(&args)
            }
        }))?;
    }
    reg.group("all", [BuildPath::new("a"), BuildPath::new("b"), BuildPath::new("c")])?;

    assert!(reg.run(Some(&BuildPath::new("all"))).await?);
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn add_during_build_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let reg = Arc::new(space.registry()?);
    let weak = Arc::downgrade(&reg);
    let seen = Arc::new(Mutex::new(None));
    let recorder = seen.clone();
    reg.add(Rule::new("out").with_recipe_fn(move |args: RecipeArgs| {
        let (weak, recorder) = (weak.clone(), recorder.clone());
        async move {
            if let Some(reg) = weak.upgrade() {
                *recorder.lock().unwrap() = Some(reg.group("late", ["x"]));
            }
            concat(&args)
        }
    }))?;

    assert!(reg.run(None).await?);
    let result = seen.lock().unwrap().take().expect("recipe ran");
    assert!(matches!(result, Err(Error::BuildInProgress)));
    assert_eq!(reg.rule_count(), 1);
    Ok(())
}

#[tokio::test]
async fn session_results_are_per_session() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let reg = space.registry()?;
    let count = Counter::default();
    reg.add(slow_rule("out", vec![src("in")], &count))?;

    let first = Session::new(&reg, None);
    let second = Session::new(&reg, None);
    let (a, b) = tokio::join!(first.run(), second.run());
    assert!(a? && b?);
    assert_eq!(count.get(), 1);

    // Exactly one of the two sessions ran the recipe.
    let ran = [&first, &second]
        .iter()
        .filter(|s| s.elapsed_of(&BuildPath::new("out")).is_some())
        .count();
    assert_eq!(ran, 1);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn spawn_captures_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let reg = space.registry()?;
    reg.add(Rule::new("out").with_recipe_fn(|args: RecipeArgs| async move {
        let target = args.targets().scalar().cloned().unwrap_or_default();
        let script = format!("echo building; echo oops >&2; touch '{}'", target.display());
        args.spawn("sh", ["-c", script.as_str()]).await
    }))?;

    let session = Session::new(&reg, None);
    assert!(session.run().await?);
    let log = session.log_of(&BuildPath::new("out")).unwrap_or_default();
    assert!(log.contains("building"), "{}", log);
    assert!(log.contains("oops"), "{}", log);
    assert!(space.build_root().join("out").exists());
    Ok(())
}
