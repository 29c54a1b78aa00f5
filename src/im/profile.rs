//! 个人资料：查看、编辑、设置

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::im::api::ApiClient;
use crate::im::error::ValidationErrors;
use crate::im::types::UserData;

const FULL_NAME_MAX: usize = 50;
const HEADLINE_MAX: usize = 100;
const BIO_MAX: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio: Option<String>,
}

/// 用户公开资料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub friends: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub social_links: SocialLinks,
}

impl Profile {
    /// 用户名不区分大小写
    pub fn is_own(&self, current_username: &str) -> bool {
        self.username.eq_ignore_ascii_case(current_username)
    }

    /// 转成编辑表单的初始值
    pub fn to_update(&self) -> ProfileUpdate {
        let link = |v: &Option<String>| v.clone().unwrap_or_default();
        ProfileUpdate {
            full_name: self.full_name.clone(),
            headline: self.headline.clone(),
            bio: self.bio.clone(),
            location: self.location.clone(),
            skills: self.skills.join(", "),
            linkedin: link(&self.social_links.linkedin),
            github: link(&self.social_links.github),
            twitter: link(&self.social_links.twitter),
            portfolio: link(&self.social_links.portfolio),
        }
    }
}

/// 编辑资料表单，`skills` 是逗号分隔的原始输入
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub full_name: String,
    pub headline: String,
    pub bio: String,
    pub location: String,
    pub skills: String,
    pub linkedin: String,
    pub github: String,
    pub twitter: String,
    pub portfolio: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct EditableLinks<'a> {
    linkedin: &'a str,
    github: &'a str,
    twitter: &'a str,
    portfolio: &'a str,
}

/// `PUT /api/profile/me` 请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest<'a> {
    full_name: &'a str,
    headline: &'a str,
    bio: &'a str,
    location: &'a str,
    skills: Vec<String>,
    social_links: EditableLinks<'a>,
}

fn check_max(errors: &mut ValidationErrors, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(field, format!("String must contain at most {max} character(s)"));
    }
}

fn check_url(errors: &mut ValidationErrors, field: &str, value: &str) {
    if !value.is_empty() && Url::parse(value).is_err() {
        errors.add(field, "Invalid url");
    }
}

/// 逗号分隔的技能列表：去掉首尾空白，丢弃空项
pub fn parse_skills(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ProfileUpdate {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        check_max(&mut errors, "fullName", &self.full_name, FULL_NAME_MAX);
        check_max(&mut errors, "headline", &self.headline, HEADLINE_MAX);
        check_max(&mut errors, "bio", &self.bio, BIO_MAX);
        check_url(&mut errors, "socialLinks.linkedin", &self.linkedin);
        check_url(&mut errors, "socialLinks.github", &self.github);
        check_url(&mut errors, "socialLinks.twitter", &self.twitter);
        check_url(&mut errors, "socialLinks.portfolio", &self.portfolio);
        errors
    }

    pub fn to_request(&self) -> ProfileUpdateRequest<'_> {
        ProfileUpdateRequest {
            full_name: &self.full_name,
            headline: &self.headline,
            bio: &self.bio,
            location: &self.location,
            skills: parse_skills(&self.skills),
            social_links: EditableLinks {
                linkedin: &self.linkedin,
                github: &self.github,
                twitter: &self.twitter,
                portfolio: &self.portfolio,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProfileApi {
    api: ApiClient,
}

impl ProfileApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn get(&self, username: &str) -> Result<Profile> {
        let data: UserData<Profile> = self
            .api
            .get_json(&format!("/api/profile/{username}"))
            .await?
            .into_data("获取个人资料")
            .with_context(|| format!("获取 {username} 的资料失败"))?;
        Ok(data.user)
    }

    /// 更新自己的资料，校验不通过时不发请求
    pub async fn update(&self, update: &ProfileUpdate) -> Result<Profile> {
        update.validate().into_result()?;
        let data: UserData<Profile> = self
            .api
            .put_json("/api/profile/me", Some(&update.to_request()))
            .await?
            .into_data("更新个人资料")
            .context("Failed to update profile.")?;
        info!("[Profile] ✅ 资料已更新: {}", data.user.username);
        Ok(data.user)
    }

    /// 更新账号设置，返回服务器回传的 data（可能为空）
    pub async fn update_settings(&self, settings: &Value) -> Result<Option<Value>> {
        let response = self
            .api
            .put_json::<Value, Value>("/api/profile/me/settings", Some(settings))
            .await
            .context("更新设置失败")?;
        Ok(response.data)
    }
}
