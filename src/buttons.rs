use std::io::{stdin, Read};

use termios::*;

use crate::panel::Button;

const STDIN_FD: i32 = 0;

/// One decoded key from the operator terminal.
#[derive(Copy, Clone)]
pub enum PanelInput {
    Press(Button),
    Quit,
}

/// Front-panel buttons mapped onto the host terminal: `u`/`d` for up and
/// down, `s` or Enter for select, `q` to quit. Puts stdin into raw
/// non-blocking mode for the life of the value.
pub struct Buttons {
    initial_termios: Option<Termios>,
}

impl Buttons {
    pub fn new() -> Buttons {
        let initial_termios = Termios::from_fd(STDIN_FD).ok();
        let buttons = Buttons { initial_termios };
        buttons.setup_host_terminal();
        buttons
    }

    fn setup_host_terminal(&self) {
        if let Some(mut termios) = self.initial_termios {
            termios.c_iflag &= !(IXON | ICRNL);
            termios.c_lflag &= !(ISIG | ECHO | ICANON | IEXTEN);
            termios.c_cc[VMIN] = 0;
            termios.c_cc[VTIME] = 0;
            let _ = tcsetattr(STDIN_FD, TCSANOW, &termios);
        }
    }

    /// Drain any pending keys into panel inputs.
    pub fn poll(&mut self) -> Vec<PanelInput> {
        let mut buf = [0u8; 100];
        let size = stdin().read(&mut buf).unwrap_or(0);
        buf[..size]
            .iter()
            .filter_map(|&key| match key {
                b'u' | b'U' => Some(PanelInput::Press(Button::Up)),
                b'd' | b'D' => Some(PanelInput::Press(Button::Down)),
                b's' | b'S' | 0x0d | 0x0a => Some(PanelInput::Press(Button::Select)),
                b'q' | b'Q' => Some(PanelInput::Quit),
                _ => None,
            })
            .collect()
    }
}

impl Drop for Buttons {
    fn drop(&mut self) {
        if let Some(initial) = self.initial_termios {
            let _ = tcsetattr(STDIN_FD, TCSANOW, &initial);
        }
    }
}
