use crate::store::StoreError;

/// Symbolic model names mapped to physical tables.
///
/// An unknown model name is a hard failure, never a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Profile,
    Lead,
    LeadInteraction,
    Quotation,
    SupportTicket,
    TicketMessage,
    InventoryItem,
    Provider,
    Destination,
}

impl Model {
    pub fn from_name(name: &str) -> Result<Self, StoreError> {
        match name {
            "Profile" => Ok(Self::Profile),
            "Lead" => Ok(Self::Lead),
            "LeadInteraction" => Ok(Self::LeadInteraction),
            "Quotation" => Ok(Self::Quotation),
            "SupportTicket" => Ok(Self::SupportTicket),
            "TicketMessage" => Ok(Self::TicketMessage),
            "InventoryItem" => Ok(Self::InventoryItem),
            "Provider" => Ok(Self::Provider),
            "Destination" => Ok(Self::Destination),
            other => Err(StoreError::UnknownModel(other.to_string())),
        }
    }

    pub const fn table(self) -> &'static str {
        match self {
            Self::Profile => "profiles",
            Self::Lead => "leads",
            Self::LeadInteraction => "lead_interactions",
            Self::Quotation => "quotations",
            Self::SupportTicket => "support_tickets",
            Self::TicketMessage => "ticket_messages",
            Self::InventoryItem => "inventory_items",
            Self::Provider => "providers",
            Self::Destination => "destinations",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Profile => "Profile",
            Self::Lead => "Lead",
            Self::LeadInteraction => "LeadInteraction",
            Self::Quotation => "Quotation",
            Self::SupportTicket => "SupportTicket",
            Self::TicketMessage => "TicketMessage",
            Self::InventoryItem => "InventoryItem",
            Self::Provider => "Provider",
            Self::Destination => "Destination",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models_resolve() {
        assert_eq!(Model::from_name("Lead").unwrap().table(), "leads");
        assert_eq!(
            Model::from_name("SupportTicket").unwrap().table(),
            "support_tickets"
        );
    }

    #[test]
    fn test_unknown_model_is_hard_failure() {
        let err = Model::from_name("Booking").unwrap_err();
        assert!(err.to_string().contains("not a valid model"));
    }

    #[test]
    fn test_name_round_trip() {
        for m in [Model::Lead, Model::Quotation, Model::TicketMessage] {
            assert_eq!(Model::from_name(m.name()).unwrap(), m);
        }
    }
}
