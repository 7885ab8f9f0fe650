//! Compose an intents bitmask and show what Identify would carry.
//!
//! ```sh
//! cargo run --example intents
//! ```

#![expect(clippy::print_stdout, reason = "Demo prints its results")]

use rawcord::gateway::Intents;

fn main() {
    let intents = Intents::GUILDS
        | Intents::GUILD_MESSAGES
        | Intents::GUILD_MESSAGE_REACTIONS
        | Intents::MESSAGE_CONTENT;

    println!("intents:      {}", intents.bits());
    println!("privileged:   {}", intents.is_privileged());
    println!("needs review: {:?}", intents & Intents::PRIVILEGED);

    for (name, flag) in intents.iter_names() {
        println!("  {name:<26} {:>8}", flag.bits());
    }

    println!("default:      {}", Intents::default().bits());
    println!("all:          {}", Intents::all().bits());
}
