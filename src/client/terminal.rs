//! Stdin/stdout implementations of [`Prompt`] and [`Console`]

use std::io::{self, BufRead, Write};

use super::{Console, Prompt};

/// Reads from stdin; `quit` or `q` backs out of any prompt
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read(&mut self) -> Option<String> {
        let mut buf = String::new();
        match io::stdin().lock().read_line(&mut buf) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let text = buf.trim_end_matches(['\r', '\n']).to_string();
                if text == "quit" || text == "q" {
                    None
                } else {
                    Some(text)
                }
            }
        }
    }
}

impl Prompt for TerminalPrompt {
    fn line(&mut self, label: &str) -> Option<String> {
        print!("{label}");
        let _ = io::stdout().flush();
        self.read()
    }

    fn choose(&mut self, title: &str, options: &[&str]) -> Option<usize> {
        loop {
            println!();
            println!("{title}");
            for (i, option) in options.iter().enumerate() {
                println!("  {} = {}", i + 1, option);
            }
            print!("Choice (number, 'q' to quit): ");
            let _ = io::stdout().flush();

            let text = self.read()?;
            match text.trim().parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Some(n - 1),
                _ => println!("Invalid choice (valid options are 1 to {})", options.len()),
            }
        }
    }

    fn note(&mut self, text: &str) {
        println!("{text}");
    }
}

#[derive(Debug, Default)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn print(&mut self, line: &str) {
        println!("{line}");
    }
}
