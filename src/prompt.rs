use std::io::{self, IsTerminal, Write};

use colored::Colorize;

pub struct Prompt {
    prefix: String,
    enabled: bool,
}

impl Prompt {
    pub fn new(enabled: bool) -> Self {
        Self {
            prefix: String::from("msh>"),
            enabled,
        }
    }

    pub fn get_string(&self) -> String {
        if io::stdout().is_terminal() {
            format!("{} ", self.prefix.bold().green())
        } else {
            format!("{} ", self.prefix)
        }
    }

    pub fn display(&self) {
        if !self.enabled {
            return;
        }
        print!("{}", self.get_string());
        let _ = io::stdout().flush();
    }
}
