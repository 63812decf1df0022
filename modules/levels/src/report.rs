//! Numbered pass/fail checks and the level summary

use crossterm::style::Stylize;
use ctf_common::configuration::TargetNetwork;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckEntry {
    pub number: usize,
    pub passed: bool,
    pub message: String,
}

/// Results of a level's test phase on one target
#[derive(Debug, Clone)]
pub struct CheckReport {
    target: TargetNetwork,
    entries: Vec<CheckEntry>,
}

impl CheckReport {
    pub fn new(target: TargetNetwork) -> Self {
        Self {
            target,
            entries: Vec::new(),
        }
    }

    /// Record check number n+1 and print its line. Passing lines are yellow
    /// on the emulator and green on the testnet; failing lines are red.
    pub fn check(&mut self, passed: bool, pass_message: &str, fail_message: &str) -> bool {
        let number = self.entries.len() + 1;
        let message = if passed {
            format!("TEST {number} PASSED - {pass_message}")
        } else {
            format!("TEST {number} FAILED - {fail_message}")
        };
        if passed {
            print_pass(self.target, &message);
        } else {
            println!("{}", message.as_str().red());
        }
        self.entries.push(CheckEntry {
            number,
            passed,
            message,
        });
        passed
    }

    pub fn entries(&self) -> &[CheckEntry] {
        &self.entries
    }

    pub fn all_passed(&self) -> bool {
        self.entries.iter().all(|entry| entry.passed)
    }

    /// Final words after all checks. On the emulator a full pass only means
    /// the level still has to be finished on the testnet.
    pub fn print_summary(&self, completion: &str) {
        if !self.all_passed() {
            println!("Some tests did not pass, don't stop trying!");
            return;
        }
        println!();
        if self.target.is_emulator() {
            print_pass(self.target, "Congratulations! You seem to succesfully pass all the tests.");
            print_pass(self.target, "To fully finish this task, you have to finish it on testnet too.");
            print_pass(self.target, "Please refer to the README to configure everything correctly.");
        } else {
            print_pass(self.target, completion);
        }
    }
}

fn print_pass(target: TargetNetwork, message: &str) {
    if target.is_emulator() {
        println!("{}", message.yellow());
    } else {
        println!("{}", message.green());
    }
}
