use crate::{
    crds::{
        AccountVisibility, CTFdSpec, ChallengeVisibility, RegistrationVisibility, ScoreVisibility,
        Theme, UserMode,
    },
    date_time::DateTime,
    resources::secret::AdminCredentials,
};

/// Everything the `/setup` wizard asks for.
#[derive(Clone, Debug)]
pub struct SetupRequest {
    pub ctf_name: String,
    pub ctf_description: String,
    pub user_mode: UserMode,
    pub challenge_visibility: ChallengeVisibility,
    pub account_visibility: AccountVisibility,
    pub score_visibility: ScoreVisibility,
    pub registration_visibility: RegistrationVisibility,
    pub verify_emails: bool,
    pub team_size: Option<u32>,
    pub name: String,
    pub email: String,
    pub password: String,
    pub theme: Theme,
    pub theme_color: Option<String>,
    pub start: Option<DateTime>,
    pub end: Option<DateTime>,
}

impl SetupRequest {
    pub fn new(spec: &CTFdSpec, admin: &AdminCredentials) -> Self {
        Self {
            ctf_name: spec.title.clone(),
            ctf_description: spec.description.clone(),
            user_mode: spec.user_mode,
            challenge_visibility: spec.challenge_visibility,
            account_visibility: spec.account_visibility,
            score_visibility: spec.score_visibility,
            registration_visibility: spec.registration_visibility,
            verify_emails: spec.verify_emails,
            team_size: spec.team_size,
            name: admin.name.clone(),
            email: admin.email.clone(),
            password: admin.password.clone(),
            theme: spec.theme,
            theme_color: spec.theme_color.clone(),
            start: spec.start.clone(),
            end: spec.end.clone(),
        }
    }

    /// Form fields in submission order. Optional values are sent empty.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let timestamp = |dt: &Option<DateTime>| {
            dt.as_ref()
                .map(|dt| dt.unix_timestamp().to_string())
                .unwrap_or_default()
        };

        vec![
            ("ctf_name", self.ctf_name.clone()),
            ("ctf_description", self.ctf_description.clone()),
            ("user_mode", self.user_mode.as_str().to_string()),
            ("challenge_visibility", self.challenge_visibility.as_str().to_string()),
            ("account_visibility", self.account_visibility.as_str().to_string()),
            ("score_visibility", self.score_visibility.as_str().to_string()),
            ("registration_visibility", self.registration_visibility.as_str().to_string()),
            ("verify_emails", self.verify_emails.to_string()),
            (
                "team_size",
                self.team_size.map(|s| s.to_string()).unwrap_or_default(),
            ),
            ("name", self.name.clone()),
            ("email", self.email.clone()),
            ("password", self.password.clone()),
            ("ctf_theme", self.theme.as_str().to_string()),
            ("theme_color", self.theme_color.clone().unwrap_or_default()),
            ("start", timestamp(&self.start)),
            ("end", timestamp(&self.end)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn form_reflects_spec_and_admin() {
        let spec: CTFdSpec = serde_json::from_value(json!({
            "title": "Demo CTF",
            "userMode": "users",
            "scoreVisibility": "hidden",
            "teamSize": 4,
            "themeColor": "#ff0000",
            "start": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        let admin = AdminCredentials {
            name: "admin".into(),
            email: "admin@ctfd.internal".into(),
            password: "pw".into(),
            token: None,
        };

        let fields: HashMap<_, _> = SetupRequest::new(&spec, &admin)
            .form_fields()
            .into_iter()
            .collect();
        assert_eq!(fields["ctf_name"], "Demo CTF");
        assert_eq!(fields["user_mode"], "users");
        assert_eq!(fields["score_visibility"], "hidden");
        assert_eq!(fields["registration_visibility"], "private");
        assert_eq!(fields["verify_emails"], "true");
        assert_eq!(fields["team_size"], "4");
        assert_eq!(fields["ctf_theme"], "core-beta");
        assert_eq!(fields["theme_color"], "#ff0000");
        assert_eq!(fields["start"], "1735689600");
        assert_eq!(fields["end"], "");
        assert_eq!(fields["password"], "pw");
    }
}
