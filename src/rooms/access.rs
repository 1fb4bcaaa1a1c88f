//! Authorization for membership-mutating group operations. This is the
//! only path from request handling to member removal.

use super::group::GroupRoom;
use super::GLOBAL_ROOM_ID;
use crate::error::AppError;
use crate::model::User;

/// Remove `target_phone` from `group` if `requester` is its admin.
///
/// Returns whether a member was actually removed. Non-admin requesters get
/// `AppError::Unauthorized` and the member set is left untouched. Nobody can
/// kick from the global room.
pub async fn kick(group: &GroupRoom, target_phone: &str, requester: &User) -> Result<bool, AppError> {
    if group.id() == GLOBAL_ROOM_ID || requester.is_system() {
        tracing::warn!(
            room_id = %group.id(),
            requester = %requester.phone_number,
            "Kick rejected: room or requester is reserved"
        );
        return Err(AppError::Unauthorized(
            "Members cannot be removed from this room".to_string(),
        ));
    }

    if !group.is_admin(requester) {
        tracing::warn!(
            room_id = %group.id(),
            requester = %requester.phone_number,
            "Kick rejected: requester is not admin"
        );
        return Err(AppError::Unauthorized(
            "Only the group admin can remove members".to_string(),
        ));
    }

    Ok(group.remove_member(target_phone, requester).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn group_with_members() -> (GroupRoom, User, User, User) {
        let admin = User::new("Admin", "001");
        let intruder = User::new("Pengacau", "666");
        let victim = User::new("Korban", "002");
        let group = GroupRoom::new("g1", "Group Test", admin.clone());
        group.invite_member(intruder.clone()).await;
        group.invite_member(victim.clone()).await;
        (group, admin, intruder, victim)
    }

    #[tokio::test]
    async fn test_admin_can_kick() {
        let (group, admin, _, victim) = group_with_members().await;
        assert!(kick(&group, &victim.phone_number, &admin).await.unwrap());
        assert!(!group.is_member(&victim).await);
    }

    #[tokio::test]
    async fn test_non_admin_kick_leaves_membership_unchanged() {
        let (group, _, intruder, victim) = group_with_members().await;
        let before = group.member_phones().await;

        let result = kick(&group, &victim.phone_number, &intruder).await;

        assert!(matches!(result, Err(AppError::Unauthorized(_))));
        assert_eq!(group.member_phones().await, before);
    }

    #[tokio::test]
    async fn test_admin_identity_is_phone_based() {
        let (group, _, _, victim) = group_with_members().await;
        // Record reloaded from storage: new user id, same phone
        let reloaded_admin = User {
            user_id: Some("from-db".into()),
            ..User::new("Admin", "001")
        };
        assert!(kick(&group, &victim.phone_number, &reloaded_admin).await.unwrap());
    }

    #[tokio::test]
    async fn test_kicking_absent_member_is_not_an_error() {
        let (group, admin, _, _) = group_with_members().await;
        assert!(!kick(&group, "0999", &admin).await.unwrap());
    }

    #[tokio::test]
    async fn test_global_room_refuses_kicks_even_from_its_admin() {
        let system = User::system("System");
        let global = GroupRoom::new(GLOBAL_ROOM_ID, "Global Chat", system.clone());
        let member = User::new("Budi", "0811");
        global.invite_member(member.clone()).await;

        let result = kick(&global, &member.phone_number, &system).await;

        assert!(matches!(result, Err(AppError::Unauthorized(_))));
        assert!(global.is_member(&member).await);
    }
}
