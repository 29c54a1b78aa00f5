//! 登录 / 注册表单及客户端校验
//!
//! 校验在发请求之前完成，失败时返回字段级错误，不会触发任何网络请求。

use serde::Serialize;

use crate::im::error::ValidationErrors;

/// 简单的邮箱格式检查：`local@domain`，不含空白
pub(crate) fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

fn check_email(errors: &mut ValidationErrors, email: &str) {
    if email.trim().is_empty() {
        errors.add("email", "Email is required.");
    } else if !is_valid_email(email.trim()) {
        errors.add("email", "Please enter a valid email address.");
    }
}

/// 登录表单
#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        check_email(&mut errors, &self.email);
        if self.password.is_empty() {
            errors.add("password", "Password is required.");
        }
        errors
    }

    pub fn to_request(&self) -> LoginRequest<'_> {
        LoginRequest {
            email: self.email.trim(),
            password: &self.password,
        }
    }
}

/// `/api/auth/login` 请求体
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// 注册表单
#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm: String,
}

/// `/api/auth/register` 请求体（不含确认密码）
#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

impl SignupForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "Full name is required.");
        }
        check_email(&mut errors, &self.email);
        if self.password.is_empty() {
            errors.add("password", "Password is required.");
        } else if self.password != self.confirm {
            errors.add("confirm", "Passwords do not match.");
        }
        errors
    }

    pub fn to_request(&self) -> RegisterRequest<'_> {
        RegisterRequest {
            name: self.name.trim(),
            email: self.email.trim(),
            password: &self.password,
        }
    }
}
