use argon2::{
    Argon2,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(password: &str, hashed: &str) -> Result<(), password_hash::Error> {
    let parsed = PasswordHash::new(hashed)?;
    Argon2::default().verify_password(password.as_bytes(), &parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hashed = hash_password("trowel-2026").unwrap();
        assert!(verify_password("trowel-2026", &hashed).is_ok());
        assert!(verify_password("trowel-2025", &hashed).is_err());
    }

    #[test]
    fn malformed_hash_is_an_error_not_a_panic() {
        assert!(verify_password("x", "not-a-phc-string").is_err());
    }
}
