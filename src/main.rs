use clap::Parser;
use colored::*;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use versioned_stack::LockFreeStack;

/// Command-line arguments for the versioned stack demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print every operation performed by the demos
    #[arg(short, long)]
    verbose: bool,

    /// Run concurrent pushers against concurrent poppers
    #[arg(short, long)]
    stress_test: bool,

    /// Number of pusher threads (and popper threads) in the stress test
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Items pushed by each pusher thread in the stress test
    #[arg(long, default_value_t = 1000)]
    items: usize,

    /// Skip the walkthrough of how versions defeat the ABA pattern
    #[arg(long)]
    skip_aba_demo: bool,
}

fn main() {
    let args = Args::parse();

    println!("{}", "Versioned Lock-Free Stack Demonstration".green().bold());
    println!("=======================================\n");

    basic_demo(args.verbose);

    if !args.skip_aba_demo {
        aba_demonstration(args.verbose);
    }

    if args.stress_test {
        stress_test(args.threads, args.items, args.verbose);
    }

    println!("\n{}", "Demonstration complete!".green().bold());
}

/// Pushes a few items and pops them back in LIFO order
fn basic_demo(verbose: bool) {
    println!("{}", "Running basic demonstration...".yellow().bold());

    let stack = LockFreeStack::new();
    for item in ["first", "second", "third"] {
        let version = stack.push_versioned(item);
        if verbose {
            println!("Pushed {item:?} (version {version})");
        }
    }

    println!("Stack size: {}", stack.len());
    println!("Top of stack: {:?}", stack.peek());

    println!("\nPopping values from the stack:");
    while let Some((item, version)) = stack.pop_versioned() {
        println!("Popped: {item:?} (version {version})");
    }

    let version = stack.version();
    println!("Popping an empty stack: {:?}", stack.pop());
    println!(
        "Version before and after the empty pop: {} -> {}",
        version,
        stack.version()
    );
    println!("Stack is now empty: {}", stack.is_empty());
}

/// What the delayed thread saw during the ABA walkthrough
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AbaObservation {
    /// Top item and version read before sleeping
    before: (Option<i32>, u64),
    /// Top item and version read after waking up
    after: (Option<i32>, u64),
    /// The delayed thread's own pop, with the version it installed
    pop: Option<(i32, u64)>,
}

/// Shows a delayed reader observing the same top item twice while the
/// version reveals the intervening mutations
fn aba_demonstration(verbose: bool) -> AbaObservation {
    println!(
        "{}",
        "\nDemonstrating ABA detection with a versioned head..."
            .yellow()
            .bold()
    );

    let stack = Arc::new(LockFreeStack::new());
    stack.push(1);
    stack.push(2);
    stack.push(3);
    println!("Initial stack state: [3] → [2] → [1] (version {})", stack.version());

    let stack_clone1 = Arc::clone(&stack);
    let stack_clone2 = Arc::clone(&stack);

    let handle1 = thread::spawn(move || {
        let top = stack_clone1.peek();
        let version = stack_clone1.version();
        println!(
            "{}",
            format!("Thread 1: Observed top {top:?} at version {version}").blue()
        );

        println!("{}", "Thread 1: Going to sleep for 200ms...".blue());
        thread::sleep(Duration::from_millis(200));

        let top_now = stack_clone1.peek();
        let version_now = stack_clone1.version();
        println!(
            "{}",
            format!("Thread 1: Woke up, top is {top_now:?} at version {version_now}").blue()
        );
        if top == top_now && version != version_now {
            println!(
                "{}",
                format!(
                    "Thread 1: Same top item, but {} mutations happened while asleep",
                    version_now - version
                )
                .blue()
                .bold()
            );
        }

        let pop = stack_clone1.pop_versioned();
        println!("{}", format!("Thread 1: Pop result: {pop:?}").blue());
        AbaObservation {
            before: (top, version),
            after: (top_now, version_now),
            pop,
        }
    });

    let handle2 = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        println!(
            "{}",
            "Thread 2: Performing operations while Thread 1 is delayed".magenta()
        );

        let mut popped = Vec::new();
        for _ in 0..2 {
            if let Some((item, version)) = stack_clone2.pop_versioned() {
                println!("{}", format!("Thread 2: Popped {item} (version {version})").magenta());
                popped.push(item);
            }
        }

        let version = stack_clone2.push_versioned(3);
        println!("{}", format!("Thread 2: Pushed 3 back (version {version})").magenta());
        println!(
            "{}",
            "Thread 2: Created ABA condition (3 → 1 → 3)".magenta().bold()
        );
        popped
    });

    let observation = handle1.join().expect("Thread 1 panicked");
    let thread2_popped = handle2.join().expect("Thread 2 panicked");
    if verbose {
        println!("Thread 1 observed {observation:?}, thread 2 popped {thread2_popped:?}");
    }

    println!("\n{}", "What just happened?".green().bold());
    println!(
        "1. Thread 1 read the head: top {:?} at version {}",
        observation.before.0, observation.before.1
    );
    println!("2. While Thread 1 was sleeping, Thread 2 popped 3 and 2, then pushed 3 again");
    println!(
        "3. Thread 1 woke up to the same top item {:?}, but at version {}",
        observation.after.0, observation.after.1
    );
    println!("4. The head is swapped by comparing the whole (node, version) snapshot,");
    println!("   so only the version tells Thread 1 its first read went stale");
    println!(
        "5. Thread 1's pop read the current head and installed version {:?}",
        observation.pop.map(|(_, version)| version)
    );

    println!("\nFinal stack state (top first): {:?}", stack.to_vec());
    println!("Final version: {}", stack.version());
    observation
}

/// Concurrent pushers and poppers; every pushed item must come out exactly once
fn stress_test(threads: usize, items: usize, verbose: bool) {
    println!(
        "{}",
        "\nRunning stress test with concurrent operations..."
            .yellow()
            .bold()
    );
    println!(
        "Spawning {} pushers with {} items each and {} poppers",
        threads, items, threads
    );

    let stack = Arc::new(LockFreeStack::new());
    let pushers_done = Arc::new(AtomicUsize::new(0));
    let start_time = Instant::now();

    let push_handles: Vec<_> = (0..threads)
        .map(|thread_id| {
            let stack = Arc::clone(&stack);
            let pushers_done = Arc::clone(&pushers_done);
            thread::spawn(move || {
                let mut rng = rand::rng();
                for i in 0..items {
                    stack.push(thread_id * items + i);

                    if rng.random::<f32>() < 0.005 {
                        thread::sleep(Duration::from_micros(rng.random_range(1..10)));
                    }
                }
                if verbose {
                    println!("Pusher {} finished", thread_id);
                }
                pushers_done.fetch_add(1, Ordering::Release);
            })
        })
        .collect();

    let pop_handles: Vec<_> = (0..threads)
        .map(|thread_id| {
            let stack = Arc::clone(&stack);
            let pushers_done = Arc::clone(&pushers_done);
            thread::spawn(move || {
                let mut received = Vec::new();
                loop {
                    match stack.pop() {
                        Some(item) => received.push(item),
                        None if pushers_done.load(Ordering::Acquire) == threads
                            && stack.is_empty() =>
                        {
                            break
                        }
                        None => thread::yield_now(),
                    }
                }
                if verbose {
                    println!("Popper {} received {} items", thread_id, received.len());
                }
                received
            })
        })
        .collect();

    for handle in push_handles {
        handle.join().expect("Pusher thread panicked");
    }

    let mut received = Vec::new();
    for handle in pop_handles {
        received.extend(handle.join().expect("Popper thread panicked"));
    }

    let elapsed = start_time.elapsed();
    let unique: HashSet<_> = received.iter().copied().collect();
    let expected = threads * items;

    println!("\nStress test completed in {:.2}s!", elapsed.as_secs_f32());
    println!("Items received: {} (unique: {})", received.len(), unique.len());
    println!("Final version: {}", stack.version());
    println!(
        "Throughput: {:.0} mutations/s",
        stack.version() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    if received.len() == expected && unique.len() == expected && stack.is_empty() {
        println!("{}", "Stress test validation passed!".green().bold());
    } else {
        println!(
            "{}",
            format!(
                "Stress test validation FAILED: expected {} unique items",
                expected
            )
            .red()
            .bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aba_demonstration_observes_version_change() {
        let observation = aba_demonstration(false);

        assert_eq!(observation.before, (Some(3), 3));
        assert_eq!(observation.after, (Some(3), 6));
        assert_eq!(observation.pop, Some((3, 7)));
    }
}
