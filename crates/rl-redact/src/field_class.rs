//! Field classification for anonymization decisions.

use serde::{Deserialize, Serialize};

/// Classification of entity document fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// Person name (full, first, last, social)
    PersonName,
    /// Email address
    Email,
    /// Phone or mobile number
    Phone,
    /// Government identifier (CPF, RG, SSN, passport)
    NationalId,
    /// Postal address or any of its parts
    Address,
    /// Date of birth
    BirthDate,
    /// Other directly identifying value (health-plan card number, ...)
    Identifier,
    /// Free-form text (notes, messages)
    FreeText,
    /// Anything else
    Other,
}

impl FieldClass {
    /// Classify a field by its name. Matching is case-insensitive and
    /// ignores `_`/`-` separators.
    pub fn classify_name(name: &str) -> Self {
        let norm: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match norm.as_str() {
            "name" | "fullname" | "firstname" | "lastname" | "surname" | "givenname"
            | "socialname" | "mothername" | "fathername" | "nomecompleto" | "nome" => {
                FieldClass::PersonName
            }
            "email" | "emailaddress" | "mail" => FieldClass::Email,
            "phone" | "phonenumber" | "mobile" | "cellphone" | "telefone" | "celular" => {
                FieldClass::Phone
            }
            "cpf" | "rg" | "ssn" | "nationalid" | "passport" | "passportnumber" | "taxid"
            | "cns" => FieldClass::NationalId,
            "address" | "street" | "streetaddress" | "zip" | "zipcode" | "postalcode" | "cep"
            | "endereco" => FieldClass::Address,
            "birthdate" | "dateofbirth" | "dob" | "datanascimento" => FieldClass::BirthDate,
            "healthcardnumber" | "insurancenumber" | "medicalrecordnumber" | "mrn" => {
                FieldClass::Identifier
            }
            "notes" | "note" | "comments" | "comment" | "observations" | "description" => {
                FieldClass::FreeText
            }
            _ => FieldClass::Other,
        }
    }

    /// Returns the risk level for this field class.
    pub fn risk_level(&self) -> RiskLevel {
        match self {
            FieldClass::PersonName => RiskLevel::High,
            FieldClass::Email => RiskLevel::High,
            FieldClass::Phone => RiskLevel::High,
            FieldClass::NationalId => RiskLevel::Critical,
            FieldClass::Address => RiskLevel::High,
            FieldClass::BirthDate => RiskLevel::Medium,
            FieldClass::Identifier => RiskLevel::Critical,
            FieldClass::FreeText => RiskLevel::Variable,
            FieldClass::Other => RiskLevel::Low,
        }
    }

    /// Whether values of this class are replaced wholesale.
    pub fn is_identifying(&self) -> bool {
        matches!(
            self.risk_level(),
            RiskLevel::Medium | RiskLevel::High | RiskLevel::Critical
        )
    }
}

impl std::fmt::Display for FieldClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldClass::PersonName => "person_name",
            FieldClass::Email => "email",
            FieldClass::Phone => "phone",
            FieldClass::NationalId => "national_id",
            FieldClass::Address => "address",
            FieldClass::BirthDate => "birth_date",
            FieldClass::Identifier => "identifier",
            FieldClass::FreeText => "free_text",
            FieldClass::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Risk level for field classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    /// Generally safe
    Low,
    /// Quasi-identifier
    Medium,
    /// Directly identifying
    High,
    /// Government or institutional identifier
    Critical,
    /// Depends on content
    Variable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_names() {
        assert_eq!(FieldClass::classify_name("full_name"), FieldClass::PersonName);
        assert_eq!(FieldClass::classify_name("Email"), FieldClass::Email);
        assert_eq!(FieldClass::classify_name("date-of-birth"), FieldClass::BirthDate);
        assert_eq!(FieldClass::classify_name("cpf"), FieldClass::NationalId);
        assert_eq!(FieldClass::classify_name("notes"), FieldClass::FreeText);
        assert_eq!(FieldClass::classify_name("diagnosis"), FieldClass::Other);
    }

    #[test]
    fn test_identifying_classes() {
        assert!(FieldClass::PersonName.is_identifying());
        assert!(FieldClass::BirthDate.is_identifying());
        assert!(!FieldClass::FreeText.is_identifying());
        assert!(!FieldClass::Other.is_identifying());
    }
}
