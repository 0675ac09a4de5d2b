//! # Fiber Scheduler Demo Host
//!
//! Drives a scheduler through the classic two-task relay: one task sleeps
//! for a second and then signals an event, the other waits on the event
//! with a timeout and reports whether it was signaled.

use fiber_sched::{Scheduler, SchedulerConfig};
use fiber_types::{Duration, Timeout};
use std::cell::Cell;
use std::env;
use std::process;
use std::rc::Rc;

/// Demo tasks print, and formatting needs more room than the library's
/// 8 KiB default.
const DEMO_STACK_SIZE: usize = 64 * 1024;

fn main() {
    let args: Vec<String> = env::args().collect();

    let config = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(&args[0]);
        process::exit(1);
    });
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let sched = Scheduler::with_config(config);
    let event = sched.create_event();

    let setter_done = Rc::new(Cell::new(false));
    let waiter_done = Rc::new(Cell::new(false));

    let worker = sched.clone();
    let finished = setter_done.clone();
    sched.spawn(move || {
        println!("task 1: sleeping for one second");
        worker.sleep(Duration::from_secs(1));
        println!("task 1: setting the event");
        worker.set_event(event);
        finished.set(true);
    });

    let worker = sched.clone();
    let finished = waiter_done.clone();
    sched.spawn(move || {
        println!("task 2: waiting for the event");
        let signaled = worker.wait_event(event, Timeout::After(Duration::from_secs(5)));
        println!(
            "task 2: the event was signaled: {}",
            if signaled { "yes" } else { "no" }
        );
        finished.set(true);
    });

    while !(setter_done.get() && waiter_done.get()) {
        if sched.tick().is_none() {
            // Nothing was ready; give the OS a moment before retrying.
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    println!("demo: all tasks finished");
}

fn parse_args(args: &[String]) -> Result<SchedulerConfig, String> {
    let mut config = SchedulerConfig::default().with_stack_size(DEMO_STACK_SIZE);
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--stack-size" | "-s" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --stack-size".to_string());
                }
                let bytes = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid stack size: {}", args[i]))?;
                config = config.with_stack_size(bytes);
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    Ok(config)
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --stack-size <BYTES>  Task stack size (default {})", DEMO_STACK_SIZE);
    eprintln!("  -h, --help                Show this help message");
}
