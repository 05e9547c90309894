//! Session commands and the events they raise on the workstation

use crate::plan::PlanDelivery;
use std::fmt;

/// Session command carried by a COMMAND message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum CommandTag {
    Start = 1,
    Stop = 2,
    Pause = 3,
    Resume = 4,
}

impl CommandTag {
    pub const ALL: [CommandTag; 4] = [Self::Start, Self::Stop, Self::Pause, Self::Resume];

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Start),
            2 => Some(Self::Stop),
            3 => Some(Self::Pause),
            4 => Some(Self::Resume),
            _ => None,
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
        };
        f.write_str(name)
    }
}

/// Notification raised by the workstation for each handled message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Start,
    Stop,
    Pause,
    Resume,
    /// A plan was decoded, rebuilt and acknowledged
    PlanReceived(PlanDelivery),
}

impl From<CommandTag> for ClientEvent {
    fn from(command: CommandTag) -> Self {
        match command {
            CommandTag::Start => Self::Start,
            CommandTag::Stop => Self::Stop,
            CommandTag::Pause => Self::Pause,
            CommandTag::Resume => Self::Resume,
        }
    }
}

/// Translate a raw command tag into its event
///
/// Tags outside 1..=4 produce no event. Transition validity (e.g. resume
/// without a prior pause) is left to the host.
pub fn dispatch(raw: i64) -> Option<ClientEvent> {
    CommandTag::from_i64(raw).map(ClientEvent::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_is_total_over_known_tags() {
        let events: Vec<ClientEvent> = (1..=4).filter_map(dispatch).collect();
        assert_eq!(
            events,
            vec![
                ClientEvent::Start,
                ClientEvent::Stop,
                ClientEvent::Pause,
                ClientEvent::Resume
            ]
        );
    }

    #[test]
    fn test_dispatch_ignores_unknown_tags() {
        for raw in [0, 5, -1, i64::MAX, i64::MIN] {
            assert!(dispatch(raw).is_none(), "tag {raw} should be ignored");
        }
    }

    #[test]
    fn test_tag_values() {
        for command in CommandTag::ALL {
            assert_eq!(CommandTag::from_i64(command as i64), Some(command));
        }
        assert_eq!(CommandTag::Resume.to_string(), "RESUME");
    }
}
