//! Terminal output helpers.

use colored::Colorize;

pub fn print_banner() {
    println!("{}", "crewgate — your crew is listening".bold());
    println!("{}", "type a message, @mention bots, /help for commands, exit to quit".dimmed());
    println!();
}

pub fn print_response(text: &str) {
    println!("\n{} {}\n", "Crew:".green().bold(), text);
}

pub fn print_thinking() {
    use std::io::Write;
    print!("{}", "…".dimmed());
    let _ = std::io::stdout().flush();
}

pub fn clear_thinking() {
    use std::io::Write;
    print!("\r \r");
    let _ = std::io::stdout().flush();
}
