pub mod validation;

pub use validation::{
    normalize_skills, optional_text, required_text, validate_email, validate_password,
    validate_phone, validate_rating, validate_url,
};
