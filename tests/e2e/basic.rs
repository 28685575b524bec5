use crate::e2e::*;
use kiln::{BuildPath, Event, EventChannel, Path, RecipeArgs, Rule, Session, Shape};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in.txt", "hello")?;
    let reg = space.registry()?;
    let count = Counter::default();
    reg.add(concat_rule("out.txt", vec![src("in.txt")], &count))?;

    assert!(reg.run(None).await?);
    assert_eq!(space.read_built("out.txt")?, "hello");
    assert_eq!(count.get(), 1);
    Ok(())
}

#[tokio::test]
async fn create_subdir() -> anyhow::Result<()> {
    // Output directories are created before the recipe runs.
    let space = TestSpace::new()?;
    space.write("a/in.txt", "x")?;
    let reg = space.registry()?;
    reg.add(concat_rule(
        "deep/er/out.txt",
        vec![src("a/in.txt")],
        &Counter::default(),
    ))?;
    assert!(reg.run(Some(&BuildPath::new("deep/er/out.txt"))).await?);
    assert_eq!(space.read_built("deep/er/out.txt")?, "x");
    Ok(())
}

#[tokio::test]
async fn diamond_builds_shared_prereq_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("base.txt", "b")?;
    let reg = space.registry()?;
    let (base, left, right, top) = (
        Counter::default(),
        Counter::default(),
        Counter::default(),
        Counter::default(),
    );
    reg.add(concat_rule("top", vec![built("left"), built("right")], &top))?;
    reg.add(concat_rule("left", vec![built("base")], &left))?;
    reg.add(concat_rule("right", vec![built("base")], &right))?;
    reg.add(concat_rule("base", vec![src("base.txt")], &base))?;

    let session = Session::new(&reg, None);
    assert!(session.run().await?);
    assert_eq!(
        (base.get(), left.get(), right.get(), top.get()),
        (1, 1, 1, 1)
    );
    assert_eq!(space.read_built("top")?, "bb");

    let executed = session.executed();
    assert_eq!(executed.len(), 4);
    assert_eq!(executed.first(), Some(&BuildPath::new("base")));
    assert_eq!(executed.last(), Some(&BuildPath::new("top")));
    Ok(())
}

#[tokio::test]
async fn group_target_has_no_timing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("a.txt", "a")?;
    space.write("b.txt", "b")?;
    let reg = space.registry()?;
    let count = Counter::default();
    reg.group("all", [BuildPath::new("a"), BuildPath::new("b")])?;
    reg.add(concat_rule("a", vec![src("a.txt")], &count))?;
    reg.add(concat_rule("b", vec![src("b.txt")], &count))?;

    let session = Session::new(&reg, None);
    assert!(session.run().await?);
    assert_eq!(count.get(), 2);

    let all = BuildPath::new("all");
    assert_eq!(session.result_of(&all), Some(true));
    assert_eq!(session.elapsed_of(&all), None);
    assert!(!session.executed().contains(&all));
    assert!(session.elapsed_of(&BuildPath::new("a")).is_some());
    assert!(session.elapsed_of(&BuildPath::new("b")).is_some());
    Ok(())
}

#[tokio::test]
async fn shapes_reach_the_recipe() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.c", "")?;
    space.write("util.c", "")?;
    let reg = space.registry()?;
    let seen = Arc::new(Mutex::new(None));

    let prereqs: BTreeMap<String, Path> = [
        ("main".to_string(), src("main.c")),
        ("util".to_string(), src("util.c")),
    ]
    .into_iter()
    .collect();
    let recorder = seen.clone();
    reg.add(
        Rule::new(["prog", "prog.map"])
            .with_prereqs(prereqs)
            .with_recipe_fn(move |args: RecipeArgs| {
                let recorder = recorder.clone();
                async move {
                    *recorder.lock().unwrap() =
                        Some((args.sources().clone(), args.targets().clone()));
                    concat(&args)
                }
            }),
    )?;

    assert!(reg.run(None).await?);
    let (sources, targets) = seen.lock().unwrap().take().expect("recipe ran");
    match sources {
        Shape::Keyed(map) => {
            assert_eq!(map["main"], space.src_root().join("main.c"));
            assert_eq!(map["util"], space.src_root().join("util.c"));
        }
        other => panic!("expected keyed sources, got {:?}", other),
    }
    assert_eq!(
        targets.list(),
        Some(
            &[
                space.build_root().join("prog"),
                space.build_root().join("prog.map")
            ][..]
        )
    );
    Ok(())
}

#[tokio::test]
async fn multi_target_rule_runs_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let reg = space.registry()?;
    let count = Counter::default();
    let counter = count.clone();
    reg.add(
        Rule::new(["a", "b"])
            .with_prereqs("in")
            .with_recipe_fn(move |args: RecipeArgs| {
                let counter = counter.clone();
                async move {
                    counter.bump();
                    args.log().write_all(b"writing a and b\n")?;
                    concat(&args)
                }
            }),
    )?;
    reg.group("both", [BuildPath::new("a"), BuildPath::new("b")])?;

    let session = Session::new(&reg, Some(BuildPath::new("both")));
    assert!(session.run().await?);
    assert_eq!(count.get(), 1);
    assert_eq!(space.read_built("b")?, "x");

    // Both targets share the result and log, but the run is timed and
    // listed once.
    let (a, b) = (BuildPath::new("a"), BuildPath::new("b"));
    assert_eq!(session.result_of(&a), Some(true));
    assert_eq!(session.result_of(&b), Some(true));
    assert_eq!(session.executed().len(), 1);
    let timed: Vec<_> = [&a, &b]
        .into_iter()
        .filter(|t| session.elapsed_of(t).is_some())
        .collect();
    assert_eq!(timed, session.executed().iter().collect::<Vec<_>>());
    assert_eq!(session.log_of(&a).as_deref(), Some("writing a and b\n"));
    assert_eq!(session.log_of(&b), session.log_of(&a));
    Ok(())
}

#[tokio::test]
async fn recipe_outcomes() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let reg = space.registry()?;
    // No explicit result counts as success.
    reg.add(Rule::new("unit").with_recipe_fn(|args: RecipeArgs| async move {
        std::fs::write(args.targets().scalar().unwrap(), "").unwrap();
    }))?;
    reg.add(Rule::new("no").with_recipe_fn(|_args| async { false }))?;
    reg.add(Rule::new("yes").with_recipe_fn(|args: RecipeArgs| async move {
        std::fs::write(args.targets().scalar().unwrap(), "")?;
        Ok::<_, std::io::Error>(true)
    }))?;

    assert!(reg.run(Some(&BuildPath::new("unit"))).await?);
    assert!(!reg.run(Some(&BuildPath::new("no"))).await?);
    assert!(reg.run(Some(&BuildPath::new("yes"))).await?);
    Ok(())
}

#[tokio::test]
async fn recipe_log_and_events() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let reg = space.registry()?;
    let rule = reg.add(Rule::new("out").with_recipe_fn(|args: RecipeArgs| async move {
        args.log().write_all(b"compiling\n")?;
        std::fs::write(args.targets().scalar().unwrap(), "")?;
        Ok::<_, anyhow::Error>(())
    }))?;

    let (progress, mut rx) = EventChannel::new();
    let session = Session::new(&reg, None).with_progress(Arc::new(progress));
    assert!(session.run().await?);

    let out = BuildPath::new("out");
    assert_eq!(session.log_of(&out).as_deref(), Some("compiling\n"));
    assert_eq!(rx.recv().await, Some(Event::StartTarget(out.clone())));
    assert_eq!(
        rx.recv().await,
        Some(Event::RecipeLog(rule, b"compiling\n".to_vec()))
    );
    assert_eq!(rx.recv().await, Some(Event::EndTarget(out, true)));
    Ok(())
}

#[tokio::test]
async fn chrome_trace() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    let reg = space.registry()?;
    reg.add(concat_rule("out", vec![src("in")], &Counter::default()))?;
    let session = Session::new(&reg, None);
    assert!(session.run().await?);

    let trace = space.build_root().join("trace.json");
    kiln::trace::write_chrome_trace(&session, &trace)?;
    let events: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&trace)?)?;
    assert_eq!(events[0]["name"], "out");
    assert_eq!(events[0]["ph"], "X");
    Ok(())
}
