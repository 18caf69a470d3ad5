pub mod announcement;
pub mod campaign;
pub mod member;

pub use announcement::GetAnnouncementFilename;
pub use campaign::{
    Campaign, CampaignStatus, FindActiveCampaignForRecipient, GetActiveCampaignIds,
    GetCampaignById, ListDueCampaigns, TryTransitionCampaign, UpdateCampaignStatus,
};
pub use member::{ListCampaignRecipients, Member, SetDoNotCallByPhone};
