use bitflags::bitflags;

bitflags! {
    /// Role tags carried by a membership. Stored in SQLite as a
    /// comma-separated tag list (`"owner,admin"`); plain members carry none.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Roles: u8 {
        const OWNER = 1 << 0;
        const ADMIN = 1 << 1;
    }
}

/// Roles allowed to manage server content (channels, others' messages, invites, kicks).
pub const CONTENT_MANAGERS: Roles = Roles::OWNER.union(Roles::ADMIN);

impl Roles {
    /// Parse role tags. Unknown tags are ignored.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Self {
        tags.into_iter().fold(Roles::empty(), |acc, tag| {
            acc | match tag.trim().to_ascii_lowercase().as_str() {
                "owner" => Roles::OWNER,
                "admin" => Roles::ADMIN,
                _ => Roles::empty(),
            }
        })
    }

    pub fn to_tags(self) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if self.contains(Roles::OWNER) {
            tags.push("owner");
        }
        if self.contains(Roles::ADMIN) {
            tags.push("admin");
        }
        tags
    }

    /// Storage form for the `server_members.roles` column.
    pub fn to_column(self) -> String {
        self.to_tags().join(",")
    }

    pub fn from_column(column: &str) -> Self {
        Self::from_tags(column.split(','))
    }
}

/// What a principal is trying to do inside a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// See the server, its channels, members and history.
    ViewServer,
    SendMessages,
    /// Delete other members' messages.
    ManageMessages,
    ManageChannels,
    CreateInvites,
    ManageInvites,
    KickMembers,
    ManageRoles,
    ManageServer,
    DeleteServer,
    TransferOwnership,
}

/// Which memberships satisfy an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    AnyMember,
    AnyOf(Roles),
    OwnerOnly,
}

impl Action {
    /// Human-readable name, used in `Forbidden` errors.
    pub fn describe(self) -> &'static str {
        match self {
            Action::ViewServer => "view server",
            Action::SendMessages => "send messages",
            Action::ManageMessages => "manage messages",
            Action::ManageChannels => "manage channels",
            Action::CreateInvites => "create invites",
            Action::ManageInvites => "manage invites",
            Action::KickMembers => "kick members",
            Action::ManageRoles => "manage roles",
            Action::ManageServer => "manage server",
            Action::DeleteServer => "delete server",
            Action::TransferOwnership => "transfer ownership",
        }
    }

    pub fn requirement(self) -> Requirement {
        match self {
            Action::ViewServer | Action::SendMessages => Requirement::AnyMember,
            Action::ManageMessages
            | Action::ManageChannels
            | Action::CreateInvites
            | Action::ManageInvites
            | Action::KickMembers => Requirement::AnyOf(CONTENT_MANAGERS),
            Action::ManageRoles
            | Action::ManageServer
            | Action::DeleteServer
            | Action::TransferOwnership => Requirement::OwnerOnly,
        }
    }
}

/// Authorization facts about one server, as seen by one principal.
#[derive(Debug, Clone, Copy)]
pub struct ServerAccess<'a> {
    pub owner_id: &'a str,
    /// The principal's membership roles, `None` when not a member.
    pub membership: Option<Roles>,
}

impl ServerAccess<'_> {
    /// Owners and members can see a server. Everyone else gets "not found".
    pub fn is_visible_to(&self, principal: &str) -> bool {
        principal == self.owner_id || self.membership.is_some()
    }
}

/// Decide whether `principal` may perform `action`.
///
/// Evaluation order:
///   1. The server owner is allowed everything, whatever the membership row says.
///   2. Non-members are denied.
///   3. The membership's roles are tested against the action's requirement.
pub fn can_perform(principal: &str, access: &ServerAccess<'_>, action: Action) -> bool {
    if principal == access.owner_id {
        return true;
    }

    let Some(roles) = access.membership else {
        return false;
    };

    match action.requirement() {
        Requirement::AnyMember => true,
        Requirement::AnyOf(allowed) => roles.intersects(allowed),
        Requirement::OwnerOnly => false,
    }
}

/// Message deletion: the author may always delete their own message,
/// anyone else needs `ManageMessages`.
pub fn can_delete_message(principal: &str, author_id: &str, access: &ServerAccess<'_>) -> bool {
    (principal == author_id && access.is_visible_to(principal))
        || can_perform(principal, access, Action::ManageMessages)
}

/// Whether `actor` may kick `target`. Content managers may kick plain members,
/// only the owner may kick an admin, and nobody kicks the owner.
pub fn can_kick(
    actor: &str,
    target: &str,
    target_roles: Roles,
    access: &ServerAccess<'_>,
) -> bool {
    if target == access.owner_id || actor == target {
        return false;
    }
    if !can_perform(actor, access, Action::KickMembers) {
        return false;
    }
    actor == access.owner_id || !target_roles.intersects(CONTENT_MANAGERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ACTIONS: [Action; 11] = [
        Action::ViewServer,
        Action::SendMessages,
        Action::ManageMessages,
        Action::ManageChannels,
        Action::CreateInvites,
        Action::ManageInvites,
        Action::KickMembers,
        Action::ManageRoles,
        Action::ManageServer,
        Action::DeleteServer,
        Action::TransferOwnership,
    ];

    fn access(membership: Option<Roles>) -> ServerAccess<'static> {
        ServerAccess {
            owner_id: "owner",
            membership,
        }
    }

    #[test]
    fn test_roles_from_tags() {
        assert_eq!(Roles::from_tags(["owner"]), Roles::OWNER);
        assert_eq!(Roles::from_tags(["Admin", "unknown"]), Roles::ADMIN);
        assert_eq!(Roles::from_tags(Vec::<&str>::new()), Roles::empty());
        assert_eq!(Roles::from_column("owner,admin"), Roles::OWNER | Roles::ADMIN);
        assert_eq!(Roles::from_column(""), Roles::empty());
    }

    #[test]
    fn test_roles_column_roundtrip() {
        for roles in [Roles::empty(), Roles::ADMIN, Roles::OWNER, Roles::all()] {
            assert_eq!(Roles::from_column(&roles.to_column()), roles);
        }
        assert_eq!(Roles::all().to_column(), "owner,admin");
    }

    #[test]
    fn test_owner_bypasses_everything() {
        for action in ALL_ACTIONS {
            assert!(can_perform("owner", &access(Some(Roles::OWNER)), action));
            // The owner row is not what grants access.
            assert!(can_perform("owner", &access(None), action));
            assert!(can_perform("owner", &access(Some(Roles::empty())), action));
        }
    }

    #[test]
    fn test_non_member_denied_everything() {
        for action in ALL_ACTIONS {
            assert!(!can_perform("stranger", &access(None), action));
        }
        assert!(!access(None).is_visible_to("stranger"));
    }

    #[test]
    fn test_plain_member() {
        let a = access(Some(Roles::empty()));
        assert!(can_perform("m", &a, Action::ViewServer));
        assert!(can_perform("m", &a, Action::SendMessages));
        assert!(!can_perform("m", &a, Action::ManageChannels));
        assert!(!can_perform("m", &a, Action::ManageMessages));
        assert!(!can_perform("m", &a, Action::CreateInvites));
        assert!(!can_perform("m", &a, Action::KickMembers));
        assert!(!can_perform("m", &a, Action::ManageServer));
    }

    #[test]
    fn test_admin_gets_content_management_only() {
        let a = access(Some(Roles::ADMIN));
        assert!(can_perform("adm", &a, Action::ManageChannels));
        assert!(can_perform("adm", &a, Action::ManageMessages));
        assert!(can_perform("adm", &a, Action::CreateInvites));
        assert!(can_perform("adm", &a, Action::ManageInvites));
        assert!(can_perform("adm", &a, Action::KickMembers));
        assert!(!can_perform("adm", &a, Action::ManageServer));
        assert!(!can_perform("adm", &a, Action::DeleteServer));
        assert!(!can_perform("adm", &a, Action::ManageRoles));
        assert!(!can_perform("adm", &a, Action::TransferOwnership));
    }

    #[test]
    fn test_owner_tag_on_non_owner_grants_content_management() {
        // A stale owner tag (e.g. after a transfer) still counts as a content role,
        // but never unlocks owner-only actions.
        let a = access(Some(Roles::OWNER));
        assert!(can_perform("former", &a, Action::ManageChannels));
        assert!(!can_perform("former", &a, Action::DeleteServer));
    }

    #[test]
    fn test_delete_message_author_or_manager() {
        let member = access(Some(Roles::empty()));
        assert!(can_delete_message("w", "w", &member));
        assert!(!can_delete_message("w", "u", &member));

        let admin = access(Some(Roles::ADMIN));
        assert!(can_delete_message("adm", "u", &admin));

        assert!(can_delete_message("owner", "u", &access(None)));
        assert!(!can_delete_message("gone", "gone", &access(None)));
    }

    #[test]
    fn test_kick_rules() {
        let admin = access(Some(Roles::ADMIN));
        assert!(can_kick("adm", "m", Roles::empty(), &admin));
        assert!(!can_kick("adm", "adm2", Roles::ADMIN, &admin));
        assert!(!can_kick("adm", "owner", Roles::OWNER, &admin));
        assert!(!can_kick("adm", "adm", Roles::ADMIN, &admin));

        let owner = access(Some(Roles::OWNER));
        assert!(can_kick("owner", "adm", Roles::ADMIN, &owner));

        let member = access(Some(Roles::empty()));
        assert!(!can_kick("m", "m2", Roles::empty(), &member));
    }

    #[test]
    fn test_requirements() {
        assert_eq!(Action::SendMessages.requirement(), Requirement::AnyMember);
        assert_eq!(
            Action::ManageChannels.requirement(),
            Requirement::AnyOf(CONTENT_MANAGERS)
        );
        assert_eq!(Action::DeleteServer.requirement(), Requirement::OwnerOnly);
    }
}
