use super::ChallengeSynchronizer;
use crate::{crds::ChallengeDescription, ctfd::Flag, error::Result};
use tracing::info;

impl ChallengeSynchronizer<'_> {
    /// Exactly one flag per challenge, carrying the defined content.
    pub(super) async fn sync_flag(&mut self, challenge_id: i64, definition: &ChallengeDescription) -> Result<()> {
        let mut flags = self.platform.list_flags(challenge_id).await?;

        if flags.is_empty() {
            let created = self
                .platform
                .create_flag(&Flag {
                    challenge_id,
                    content: definition.spec.flag.clone(),
                    ..Default::default()
                })
                .await?;
            self.report.flags_created += 1;
            info!(challenge_id, flag = created.id, "Created flag");
            flags.push(created);
        }

        for extra in flags.split_off(1) {
            info!(challenge_id, flag = extra.id, "Deleting extra flag");
            self.platform.delete_flag(extra.id).await?;
            self.report.flags_deleted += 1;
        }

        let first = &flags[0];
        if first.content != definition.spec.flag {
            info!(challenge_id, flag = first.id, "Updating flag");
            let updated = Flag {
                content: definition.spec.flag.clone(),
                ..first.clone()
            };
            self.platform.update_flag(&updated).await?;
            self.report.flags_updated += 1;
        }

        Ok(())
    }
}
