pub mod access_code;
pub mod calendar;
pub mod case;
pub mod dashboard;
pub mod group;
pub mod invitation;
pub mod mailer;
pub mod member;
pub mod reference;
pub mod session;
pub mod sweeper;
pub mod validation;
pub mod voter;
