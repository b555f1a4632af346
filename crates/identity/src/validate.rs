//! Input validation producing field-addressable errors.

use keygate_auth::Role;
use keygate_core::FieldErrors;

use crate::identity::{IdentityPatch, NewIdentity};
use crate::password::MAX_PASSWORD_BYTES;

const MAX_EMAIL_LEN: usize = 254;

/// Structural email check: `local@domain.tld`, no whitespace, one `@`.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

fn require(errs: &mut FieldErrors, field: &str, value: &str) -> bool {
    if value.is_empty() {
        errs.push(field, "is required");
        false
    } else {
        true
    }
}

fn check_password(errs: &mut FieldErrors, password: &str, confirm: &str) {
    if password.len() > MAX_PASSWORD_BYTES {
        errs.push("password", format!("must be at most {MAX_PASSWORD_BYTES} bytes"));
    }
    if password != confirm {
        errs.push("password_confirm", "must match password");
    }
}

fn check_roles(errs: &mut FieldErrors, roles: &[Role]) {
    if roles.is_empty() {
        errs.push("roles", "at least one role is required");
        return;
    }
    for role in roles.iter().filter(|r| !r.is_known()) {
        errs.push("roles", format!("unknown role '{role}'"));
    }
}

/// Registration input checks.
pub fn check_new(new: &NewIdentity) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();

    require(&mut errs, "name", &new.name);
    if require(&mut errs, "email", &new.email) && !is_valid_email(&new.email) {
        errs.push("email", "must be a valid email address");
    }
    let has_password = require(&mut errs, "password", &new.password);
    let has_confirm = require(&mut errs, "password_confirm", &new.password_confirm);
    if has_password && has_confirm {
        check_password(&mut errs, &new.password, &new.password_confirm);
    }
    check_roles(&mut errs, &new.roles);

    errs.into_result()
}

/// Merge-patch checks; only present fields are examined.
pub fn check_patch(patch: &IdentityPatch) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();

    if let Some(name) = &patch.name {
        require(&mut errs, "name", name);
    }
    if let Some(email) = &patch.email {
        if !is_valid_email(email) {
            errs.push("email", "must be a valid email address");
        }
    }
    if let Some(roles) = &patch.roles {
        check_roles(&mut errs, roles);
    }
    match (&patch.password, &patch.password_confirm) {
        (Some(password), confirm) => {
            if require(&mut errs, "password", password) {
                check_password(&mut errs, password, confirm.as_deref().unwrap_or_default());
            }
        }
        (None, Some(_)) => errs.push("password", "is required when password_confirm is given"),
        (None, None) => {}
    }

    errs.into_result()
}

pub fn check_email(email: &str) -> Result<(), FieldErrors> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(FieldErrors::single("email", "must be a valid email address"))
    }
}

pub fn check_page(page: u32, rows_per_page: u32) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();
    if page == 0 {
        errs.push("page", "must be at least 1");
    }
    if rows_per_page == 0 {
        errs.push("rows", "must be at least 1");
    }
    errs.into_result()
}
