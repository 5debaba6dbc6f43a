use std::fmt;

use fake::Fake;
use fake::faker::address::raw::{CityName, PostCode, StreetName};
use fake::faker::company::raw::CompanyName;
use fake::faker::impls::address::CityNameGenFn;
use fake::faker::internet::raw::{FreeEmail, IPv4, SafeEmail, Username};
use fake::faker::lorem::raw::{Sentence, Word};
use fake::faker::name::raw::{FirstName, LastName, Name};
use fake::faker::phone_number::raw::PhoneNumber;
use fake::locales::{Data, EN, FR_FR, PT_BR};
use rand_chacha::ChaCha8Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocaleKey {
    EnUs,
    PtBr,
    FrFr,
}

impl LocaleKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "en_US" => Some(Self::EnUs),
            "pt_BR" => Some(Self::PtBr),
            "fr_FR" => Some(Self::FrFr),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnUs => "en_US",
            Self::PtBr => "pt_BR",
            Self::FrFr => "fr_FR",
        }
    }
}

impl fmt::Display for LocaleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthetic value generators available to `faker` rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FakerKind {
    Name,
    FirstName,
    LastName,
    Email,
    FreeEmail,
    Username,
    PhoneNumber,
    Company,
    City,
    Street,
    Postcode,
    Word,
    Sentence,
    Ipv4,
}

impl FakerKind {
    pub const ALL: &'static [FakerKind] = &[
        Self::Name,
        Self::FirstName,
        Self::LastName,
        Self::Email,
        Self::FreeEmail,
        Self::Username,
        Self::PhoneNumber,
        Self::Company,
        Self::City,
        Self::Street,
        Self::Postcode,
        Self::Word,
        Self::Sentence,
        Self::Ipv4,
    ];

    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Email => "email",
            Self::FreeEmail => "free_email",
            Self::Username => "username",
            Self::PhoneNumber => "phone_number",
            Self::Company => "company",
            Self::City => "city",
            Self::Street => "street",
            Self::Postcode => "postcode",
            Self::Word => "word",
            Self::Sentence => "sentence",
            Self::Ipv4 => "ipv4",
        }
    }

    pub fn generate(self, locale: LocaleKey, rng: &mut ChaCha8Rng) -> String {
        match locale {
            LocaleKey::EnUs => self.generate_in(EN, rng),
            LocaleKey::PtBr => self.generate_in(PT_BR, rng),
            LocaleKey::FrFr => self.generate_in(FR_FR, rng),
        }
    }

    fn generate_in<L>(self, locale: L, rng: &mut ChaCha8Rng) -> String
    where
        L: Data + Copy + CityNameGenFn,
    {
        match self {
            Self::Name => Name(locale).fake_with_rng(rng),
            Self::FirstName => FirstName(locale).fake_with_rng(rng),
            Self::LastName => LastName(locale).fake_with_rng(rng),
            Self::Email => SafeEmail(locale).fake_with_rng(rng),
            Self::FreeEmail => FreeEmail(locale).fake_with_rng(rng),
            Self::Username => Username(locale).fake_with_rng(rng),
            Self::PhoneNumber => PhoneNumber(locale).fake_with_rng(rng),
            Self::Company => CompanyName(locale).fake_with_rng(rng),
            Self::City => CityName(locale).fake_with_rng(rng),
            Self::Street => StreetName(locale).fake_with_rng(rng),
            Self::Postcode => PostCode(locale).fake_with_rng(rng),
            Self::Word => Word(locale).fake_with_rng(rng),
            Self::Sentence => Sentence(locale, 3..8).fake_with_rng(rng),
            Self::Ipv4 => IPv4(locale).fake_with_rng(rng),
        }
    }
}

impl fmt::Display for FakerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn ids_round_trip_through_parse() {
        for kind in FakerKind::ALL {
            assert_eq!(FakerKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(FakerKind::parse("ssn"), None);
        assert_eq!(LocaleKey::parse("fr_FR"), Some(LocaleKey::FrFr));
        assert_eq!(LocaleKey::parse("de_DE"), None);
    }

    #[test]
    fn same_seed_same_values() {
        let mut first = ChaCha8Rng::seed_from_u64(42);
        let mut second = ChaCha8Rng::seed_from_u64(42);
        for kind in FakerKind::ALL {
            for locale in [LocaleKey::EnUs, LocaleKey::PtBr, LocaleKey::FrFr] {
                let a = kind.generate(locale, &mut first);
                let b = kind.generate(locale, &mut second);
                assert_eq!(a, b);
                assert!(!a.is_empty(), "{kind} in {locale} produced an empty value");
            }
        }
    }
}
