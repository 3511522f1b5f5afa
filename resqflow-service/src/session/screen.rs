use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Screen {
    #[default]
    Landing,
    UserLogin,
    AdminLogin,
    Register,
    UserDashboard,
    AdminDashboard,
    PendingMessage,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Landing => "LANDING",
            Screen::UserLogin => "USER_LOGIN",
            Screen::AdminLogin => "ADMIN_LOGIN",
            Screen::Register => "REGISTER",
            Screen::UserDashboard => "USER_DASHBOARD",
            Screen::AdminDashboard => "ADMIN_DASHBOARD",
            Screen::PendingMessage => "PENDING_MESSAGE",
        }
    }

    /// Dashboards require a classified principal.
    pub fn is_gated(&self) -> bool {
        matches!(self, Screen::UserDashboard | Screen::AdminDashboard)
    }
}

impl std::fmt::Display for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_dashboards_are_gated() {
        let gated: Vec<Screen> = [
            Screen::Landing,
            Screen::UserLogin,
            Screen::AdminLogin,
            Screen::Register,
            Screen::UserDashboard,
            Screen::AdminDashboard,
            Screen::PendingMessage,
        ]
        .into_iter()
        .filter(Screen::is_gated)
        .collect();

        assert_eq!(gated, vec![Screen::UserDashboard, Screen::AdminDashboard]);
    }

    #[test]
    fn test_display_matches_serialized_name() {
        let json = serde_json::to_string(&Screen::PendingMessage).unwrap();
        assert_eq!(json, format!("\"{}\"", Screen::PendingMessage));
    }
}
