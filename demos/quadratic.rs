//! Solves x^2 - 2x = 0 as a small task pipeline and prints the graph.
//!
//! ```sh
//! cargo run --example quadratic --features logging
//! ```
use tsumugi::Scheduler;

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "logging")]
    tsumugi::init_logging()?;

    let (a, b, c) = (1.0_f32, -2.0_f32, 0.0_f32);
    let scheduler = Scheduler::new();

    let ac4 = scheduler
        .task()
        .name("-4ac")
        .run(move || Ok(-4.0 * a * c))?;

    let discriminant = scheduler
        .task()
        .name("discriminant")
        .depends_on(scheduler.future::<f32>(ac4))
        .run(move |v| Ok(b * b + v))?;

    let plus = scheduler
        .task()
        .name("-b + sqrt")
        .depends_on(scheduler.future::<f32>(discriminant))
        .run(move |d| Ok(-b + d.sqrt()))?;

    let minus = scheduler
        .task()
        .name("-b - sqrt")
        .depends_on(scheduler.future::<f32>(discriminant))
        .run(move |d| Ok(-b - d.sqrt()))?;

    let x1 = scheduler
        .task()
        .name("x1")
        .depends_on(scheduler.future::<f32>(plus))
        .run(move |v| Ok(v / (2.0 * a)))?;

    let x2 = scheduler
        .task()
        .name("x2")
        .depends_on(scheduler.future::<f32>(minus))
        .run(move |v| Ok(v / (2.0 * a)))?;

    scheduler.execute_all()?;

    println!("{scheduler}");
    println!("x1 = {}", scheduler.result::<f32>(x1)?);
    println!("x2 = {}", scheduler.result::<f32>(x2)?);

    Ok(())
}
