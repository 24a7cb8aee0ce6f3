use clap::{App, Arg};
use log::error;

#[cfg(unix)]
mod buttons;
mod catalog;
mod config;
mod diagnostics;
mod fdc;
mod gateway;
mod panel;
mod pins;
mod storage;

use self::catalog::Catalog;
use self::config::Config;
use self::storage::DirStorage;

fn main() {
    env_logger::init();

    let mut config = Config::load();
    let matches = App::new("wd1770emu")
        .about("WD1770 floppy disk controller emulator\nSet RUST_LOG to control logging (trace,debug,info,warn,error)")
        .arg(Arg::with_name("IMAGEDIR")
            .help("Directory with disk images. Empty to use config default")
            .required(false)
            .index(1))
        .arg(Arg::with_name("list")
            .short("l")
            .long("list")
            .help("List catalogued images and bound drives, then exit"))
        .arg(Arg::with_name("diagnostics")
            .short("d")
            .long("diagnostics")
            .help("Run controller self-tests, then exit"))
        .get_matches();
    config.apply_cli_overrides(matches.value_of("IMAGEDIR"));

    if matches.is_present("diagnostics") {
        let results = diagnostics::run_diagnostics();
        if !diagnostics::print_results(&results) {
            std::process::exit(1);
        }
        return;
    }

    let mut catalog = Catalog::new(Box::new(DirStorage::new(&config.image_dir)));
    catalog.set_write_protect_names(config.write_protect.clone());
    if let Err(err) = catalog.scan() {
        error!("cannot scan {}: {}", config.image_dir, err);
        std::process::exit(1);
    }
    catalog.restore_bindings();

    if matches.is_present("list") {
        for index in 0..catalog.image_count() {
            println!("{:3}  {}", index, catalog.image_name(index).unwrap_or("?"));
        }
        for slot in 0..2 {
            match catalog.binding(slot) {
                Some(binding) => println!("drive {}: {}", slot, binding.disk.name),
                None => println!("drive {}: (empty)", slot),
            }
        }
        return;
    }

    #[cfg(unix)]
    run_panel(&mut catalog);
    #[cfg(not(unix))]
    eprintln!("The interactive panel needs a unix terminal; use --list or --diagnostics.");
}

/// Operator loop: the three front-panel buttons on the keyboard, the
/// display on stdout, and the engine polled alongside exactly as the
/// firmware super-loop would.
#[cfg(unix)]
fn run_panel(catalog: &mut Catalog) {
    use std::io::Write;
    use std::thread;
    use std::time::{Duration, Instant};

    use self::buttons::{Buttons, PanelInput};
    use self::fdc::FdcEngine;
    use self::panel::Panel;
    use self::pins::{Level, PinAssignment, SimPins};

    let assignment = PinAssignment::simulated();
    let mut io = SimPins::new();
    io.set(assignment.cs, Level::High);
    io.set(assignment.rw, Level::High);
    io.set(assignment.dden, Level::Low);
    io.set(assignment.ds0, Level::Low);
    io.set(assignment.ds1, Level::High);
    let mut fdc = FdcEngine::new(assignment);

    println!("wd1770emu - u/d/s drive the panel buttons, q quits\n");
    let mut buttons = Buttons::new();
    let mut panel = Panel::new();
    let started = Instant::now();
    let mut last_render = Vec::new();

    loop {
        for input in buttons.poll() {
            match input {
                PanelInput::Quit => return,
                PanelInput::Press(button) => panel.press(button, catalog),
            }
        }

        let now_us = started.elapsed().as_micros() as u64;
        fdc.poll(&mut io, catalog, now_us);

        // Raw terminal mode needs explicit carriage returns.
        let lines = panel.render(catalog, fdc.current_track());
        if lines != last_render {
            print!("----------------\r\n");
            for line in &lines {
                print!("{}\r\n", line);
            }
            let _ = std::io::stdout().flush();
            last_render = lines;
        }

        thread::sleep(Duration::from_millis(10));
    }
}
