use bitflags::bitflags;
use serde::{Serialize, Serializer};

bitflags! {
    /// Event categories the client asks the gateway to deliver.
    ///
    /// Sent with every Identify. Privileged intents must also be enabled for the
    /// application server-side, otherwise the gateway closes with 4014.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u32 {
        const GUILDS = 1;
        /// Privileged.
        const GUILD_MEMBERS = 1 << 1;
        /// Also known as guild bans.
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        /// Privileged.
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// Privileged.
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION = 1 << 21;

        /// Intents that require explicit approval for the application.
        const PRIVILEGED = Self::GUILD_MEMBERS.bits()
            | Self::GUILD_PRESENCES.bits()
            | Self::MESSAGE_CONTENT.bits();

        /// Every intent that does not require approval.
        const NON_PRIVILEGED = Self::GUILDS.bits()
            | Self::GUILD_MODERATION.bits()
            | Self::GUILD_EMOJIS_AND_STICKERS.bits()
            | Self::GUILD_INTEGRATIONS.bits()
            | Self::GUILD_WEBHOOKS.bits()
            | Self::GUILD_INVITES.bits()
            | Self::GUILD_VOICE_STATES.bits()
            | Self::GUILD_MESSAGES.bits()
            | Self::GUILD_MESSAGE_REACTIONS.bits()
            | Self::GUILD_MESSAGE_TYPING.bits()
            | Self::DIRECT_MESSAGES.bits()
            | Self::DIRECT_MESSAGE_REACTIONS.bits()
            | Self::DIRECT_MESSAGE_TYPING.bits()
            | Self::GUILD_SCHEDULED_EVENTS.bits()
            | Self::AUTO_MODERATION_CONFIGURATION.bits()
            | Self::AUTO_MODERATION_EXECUTION.bits();
    }
}

impl Intents {
    /// Whether any privileged intent is requested.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::NON_PRIVILEGED
    }
}

// The gateway expects the raw integer, not the flag names bitflags would emit.
impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_gateway_values() {
        assert_eq!(Intents::GUILDS.bits(), 1);
        assert_eq!(Intents::GUILD_MESSAGES.bits(), 512);
        assert_eq!(Intents::MESSAGE_CONTENT.bits(), 32_768);
        assert_eq!(Intents::GUILD_SCHEDULED_EVENTS.bits(), 65_536);
        assert_eq!(Intents::AUTO_MODERATION_EXECUTION.bits(), 2_097_152);
    }

    #[test]
    fn privileged_and_non_privileged_partition_all() {
        assert!((Intents::PRIVILEGED & Intents::NON_PRIVILEGED).is_empty());
        assert_eq!(Intents::PRIVILEGED | Intents::NON_PRIVILEGED, Intents::all());
    }

    #[test]
    fn is_privileged_detects_any_privileged_bit() {
        assert!(!Intents::default().is_privileged());
        assert!((Intents::GUILDS | Intents::MESSAGE_CONTENT).is_privileged());
    }

    #[test]
    fn serializes_as_integer() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES;

        assert_eq!(serde_json::to_string(&intents).unwrap(), "513");
    }
}
