use std::io;
use std::path::Path;

/// Built-in prompt pool used when no prompt file is configured.
pub const DEFAULT_PROMPTS: &[&str] = &[
    "The worst possible view from an office window: _____",
    "What a village wedding can never do without",
    "What a robot vacuum dreams about while it charges",
    "A bribe? Surely it's not a bribe if I just handed the judge _____",
    "The name of a planet entirely covered in corn",
    "An astonishing thing to find stuck in the cobwebs in your basement",
    "A phrase you would not tattoo on your back even for ten million",
    "Note to drivers: never operate a car and _____ at the same time",
    "Your flat is truly huge if it has a room just for _____",
    "In the future, the Moon will be renamed _____",
    "The least helpful thing to shout at a marathon runner",
    "A rejected flavour of toothpaste",
    "The real reason the dinosaurs went extinct",
    "What the cat is actually thinking when it stares at the wall",
    "A terrible name for a children's hospital",
    "The secret ingredient in grandma's famous soup",
];

pub fn default_prompts() -> Vec<String> {
    DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect()
}

/// Reads a prompt file with one prompt per line; blank lines are skipped.
pub fn load_prompts(path: &Path) -> io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_prompts(&contents))
}

fn parse_prompts(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
